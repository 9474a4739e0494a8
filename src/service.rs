pub mod configs;
pub mod wgcfg;

use std::path::{Path, PathBuf};

use cidr::{Ipv4Inet, Ipv6Inet};
use clap::Parser;
pub use configs::*;
pub use wgcfg::*;

use crate::{
    database::Database,
    keys::{KeyProvider, X25519Keys},
    state::State,
};

/// Prefix of per-interface state directories.
pub const DIR_PREFIX: &str = "wgc-";

#[derive(Debug, Clone, Parser)]
pub struct Config {
    #[clap(
        long,
        env = "WGC_DATABASE_DIR",
        default_value = "/etc/wireguard",
        value_parser
    )]
    pub database_dir: PathBuf,
    #[clap(
        long,
        env = "WGC_WIREGUARD_DIR",
        default_value = "/etc/wireguard",
        value_parser
    )]
    pub wireguard_dir: PathBuf,
}

/// Parameters of a freshly provisioned interface.
#[derive(Debug, Clone, Parser)]
pub struct ServerSettings {
    #[clap(short = '4', long, value_parser)]
    pub address4: Option<Ipv4Inet>,
    #[clap(short = '6', long, value_parser)]
    pub address6: Option<Ipv6Inet>,
    #[clap(short, long, default_value_t = 51820, value_parser)]
    pub port: u16,
    /// Host clients use to reach the server
    #[clap(short, long, value_parser)]
    pub endpoint: String,
    #[clap(long, default_value = "", value_parser)]
    pub dns: String,
    /// AllowedIPs written into client configs
    #[clap(long, default_value = "0.0.0.0/0, ::/0", value_parser)]
    pub route: String,
    #[clap(long, default_value_t = 0, value_parser)]
    pub keepalive: u16,
    /// Generate a preshared key shared by all peers
    #[clap(long)]
    pub preshared_key: bool,
    /// Uplink device to masquerade through; fills in the default hooks
    #[clap(long, value_parser)]
    pub nat: Option<String>,
    #[clap(long, value_parser)]
    pub post_up4: Option<String>,
    #[clap(long, value_parser)]
    pub post_down4: Option<String>,
    #[clap(long, value_parser)]
    pub post_up6: Option<String>,
    #[clap(long, value_parser)]
    pub post_down6: Option<String>,
}

impl ServerSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            address4: None,
            address6: None,
            port: 51820,
            endpoint: endpoint.into(),
            dns: String::new(),
            route: "0.0.0.0/0, ::/0".to_owned(),
            keepalive: 0,
            preshared_key: false,
            nat: None,
            post_up4: None,
            post_down4: None,
            post_up6: None,
            post_down6: None,
        }
    }

    /// `(up, down)` hooks for one family, explicit values winning over the
    /// masquerade defaults.
    pub(crate) fn hooks(&self, v6: bool) -> (String, String) {
        let (tool, up, down) = if v6 {
            ("ip6tables", &self.post_up6, &self.post_down6)
        } else {
            ("iptables", &self.post_up4, &self.post_down4)
        };
        let default = |op: &str| match &self.nat {
            Some(dev) => format!(
                "{tool} -{op} FORWARD -i %i -j ACCEPT; {tool} -t nat -{op} POSTROUTING -o {dev} -j MASQUERADE"
            ),
            None => String::new(),
        };

        (
            up.clone().unwrap_or_else(|| default("A")),
            down.clone().unwrap_or_else(|| default("D")),
        )
    }
}

/// Owns the directory layout: state under `<database_dir>/wgc-<name>`,
/// rendered server configs under `<wireguard_dir>/<name>.conf`.
#[derive(Debug, Clone)]
pub struct Wgdir<K = X25519Keys> {
    database_dir: PathBuf,
    wireguard_dir: PathBuf,
    keys: K,
}

impl Wgdir {
    pub fn new(config: Config) -> Self {
        Self::with_keys(config, X25519Keys)
    }
}

impl<K: KeyProvider + Clone> Wgdir<K> {
    pub fn with_keys(config: Config, keys: K) -> Self {
        Self {
            database_dir: config.database_dir,
            wireguard_dir: config.wireguard_dir,
            keys,
        }
    }

    pub fn database_dir(&self) -> &Path {
        &self.database_dir
    }

    pub fn wireguard_dir(&self) -> &Path {
        &self.wireguard_dir
    }

    pub fn interface_dir(&self, name: &str) -> PathBuf {
        self.database_dir.join(format!("{DIR_PREFIX}{name}"))
    }

    pub fn config_path(&self, name: &str) -> PathBuf {
        self.wireguard_dir.join(format!("{name}.conf"))
    }

    fn interface(&self, name: &str, state: State) -> Interface<K> {
        Interface::new(
            Database::new(self.interface_dir(name)),
            self.config_path(name),
            self.keys.clone(),
            state,
        )
    }
}
