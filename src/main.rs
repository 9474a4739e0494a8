use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::warn;
use wgdir::{
    netlink::Netlink,
    service::{self, LinkOracle, ServerSettings},
    PeerId, Wgdir,
};

#[derive(Debug, Parser)]
#[clap(about = "Directory backed wireguard interface and peer manager")]
struct Config {
    #[clap(short, long, env = "WGC_INTERFACE", default_value = "wg0", value_parser)]
    interface: String,
    #[clap(flatten)]
    service: service::Config,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the interface state directory and server config
    Init(ServerSettings),
    /// List configured interfaces
    Interfaces,
    /// List the server and its peers
    List,
    /// Add a peer
    Add {
        #[clap(value_parser)]
        name: String,
    },
    /// Delete a peer by id
    Rm {
        #[clap(value_parser)]
        id: PeerId,
    },
    /// Print the client config of a peer
    Show {
        #[clap(value_parser)]
        id: PeerId,
    },
    /// Write the client config of a peer to a file
    Export {
        #[clap(value_parser)]
        id: PeerId,
        #[clap(value_parser)]
        path: PathBuf,
    },
    /// Print the server config
    Make,
    /// Rewrite the server config in the wireguard directory
    Sync,
    /// Check that the state and wireguard directories are writable
    Check,
}

/// Used when the rtnetlink socket can't be opened.
struct NoLinks;

impl LinkOracle for NoLinks {
    fn interface_in_use(&self, _name: &str) -> bool {
        false
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    pretty_env_logger::init();

    let config = Config::parse();
    let wgdir = Wgdir::new(config.service);
    let name = config.interface.as_str();

    match config.command {
        Command::Init(settings) => {
            wgdir.test_directories()?;
            let interface = match Netlink::new() {
                Ok(netlink) => wgdir.create_interface(name, &settings, &netlink)?,
                Err(e) => {
                    warn!("netlink unavailable, skipping link check: {e}");
                    wgdir.create_interface(name, &settings, &NoLinks)?
                }
            };
            println!(
                "{} created, config written to {}",
                interface.name(),
                interface.config_path().display()
            );
        }
        Command::Interfaces => {
            for name in wgdir.interfaces()? {
                println!("{name}");
            }
        }
        Command::List => {
            let interface = wgdir.open(name)?;
            let state = interface.state();
            let server = state.server();
            let show = |a: Option<String>| a.unwrap_or_default();

            println!("{:<4}  {:<20}  {:<16}  {}", "#", "Name", "IPv4", "IPv6");
            println!(
                "{:04}  {:<20}  {:<16}  {}",
                wgdir::SERVER_ID,
                format!("Server ({})", server.interface),
                show(server.address4.map(|a| a.to_string())),
                show(server.address6.map(|a| a.to_string())),
            );
            for peer in state.peers() {
                println!(
                    "{:04}  {:<20}  {:<16}  {}",
                    peer.id(),
                    peer.name(),
                    show(state.peer_ipv4(peer).map(|a| a.to_string())),
                    show(state.peer_ipv6(peer).map(|a| a.to_string())),
                );
            }
        }
        Command::Add { name: peer } => {
            let mut interface = wgdir.open(name)?;
            let id = interface.add_peer(&peer)?;
            println!("{id:04} {peer}");
        }
        Command::Rm { id } => {
            let mut interface = wgdir.open(name)?;
            let peer = interface.delete_peer(id)?;
            println!("deleted {id:04} {}", peer.name());
        }
        Command::Show { id } => {
            print!("{}", wgdir.open(name)?.client_config(id)?);
        }
        Command::Export { id, path } => {
            wgdir.open(name)?.export_client_config(id, &path)?;
        }
        Command::Make => {
            print!("{}", wgdir.open(name)?.server_config()?);
        }
        Command::Sync => {
            wgdir.open(name)?.write_server_config()?;
        }
        Command::Check => {
            wgdir.test_directories()?;
            println!("ok");
        }
    }

    Ok(())
}
