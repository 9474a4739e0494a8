use std::{fmt::Write, net::Ipv6Addr, path::Path};

use thiserror::Error;

use crate::state::{Peer, Server, State};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("server {0} has no address")]
    NoAddress(String),
    #[error("format error")]
    Format(#[from] std::fmt::Error),
}

type Result<T> = std::result::Result<T, RenderError>;

fn trim_hook(hook: &str) -> &str {
    hook.trim_matches(&[' ', ';'][..])
}

/// Joins the per-family PostUp/PostDown fragments into one shell line.
pub fn merge_hooks(v4: Option<&str>, v6: Option<&str>) -> String {
    v4.into_iter()
        .chain(v6)
        .map(trim_hook)
        .filter(|h| !h.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// `host:port`, with ipv6 literals bracketed.
pub fn endpoint(host: &str, port: u16) -> String {
    match host.parse::<Ipv6Addr>() {
        Ok(_) => format!("[{host}]:{port}"),
        Err(_) => format!("{host}:{port}"),
    }
}

fn optional(out: &mut String, key: &str, value: &str) -> Result<()> {
    if !value.is_empty() {
        writeln!(out, "{key} = {value}")?;
    }
    Ok(())
}

/// Config for the server side of the interface. `origin` names the state
/// directory the file was rendered from.
pub fn server_config(state: &State, origin: &Path) -> Result<String> {
    let srv = state.server();
    if srv.address4.is_none() && srv.address6.is_none() {
        return Err(RenderError::NoAddress(srv.interface.clone()));
    }

    let mut out = String::new();
    writeln!(
        out,
        "# This file is generated by wgdir from directory {}",
        origin.display()
    )?;
    writeln!(out, "# It is likely to be overwritten.")?;
    writeln!(out)?;
    writeln!(out, "[Interface]")?;

    let v4 = srv.address4.as_ref();
    let v6 = srv.address6.as_ref();
    if let Some(a) = v4 {
        writeln!(out, "Address = {a}")?;
    }
    if let Some(a) = v6 {
        writeln!(out, "Address = {a}")?;
    }

    let post_up = merge_hooks(
        v4.map(|_| srv.post_up4.as_str()),
        v6.map(|_| srv.post_up6.as_str()),
    );
    let post_down = merge_hooks(
        v4.map(|_| srv.post_down4.as_str()),
        v6.map(|_| srv.post_down6.as_str()),
    );
    optional(&mut out, "PostUp", &post_up)?;
    optional(&mut out, "PostDown", &post_down)?;
    writeln!(out, "ListenPort = {}", srv.listen_port)?;
    writeln!(out, "PrivateKey = {}", srv.private_key)?;

    for peer in state.peers() {
        writeln!(out)?;
        writeln!(out, "# peer {}", peer.name())?;
        writeln!(out, "[Peer]")?;
        optional(&mut out, "PresharedKey", &srv.preshared_key)?;
        writeln!(out, "PublicKey = {}", peer.public_key())?;
        writeln!(out, "AllowedIPs = {}", srv.allowed_ips(peer.id()))?;
    }

    Ok(out)
}

/// Config handed to a peer: its own keys and addresses, the server as the
/// only remote.
pub fn client_config(server: &Server, peer: &Peer) -> Result<String> {
    if server.address4.is_none() && server.address6.is_none() {
        return Err(RenderError::NoAddress(server.interface.clone()));
    }

    let mut out = String::new();
    writeln!(out, "[Interface]")?;
    writeln!(out, "PrivateKey = {}", peer.private_key())?;
    writeln!(out, "Address = {}", server.allowed_ips(peer.id()))?;
    optional(&mut out, "DNS", &server.client_dns)?;

    writeln!(out)?;
    writeln!(out, "[Peer]")?;
    optional(&mut out, "PresharedKey", &server.preshared_key)?;
    writeln!(out, "PublicKey = {}", server.public_key)?;
    optional(&mut out, "AllowedIPs", &server.client_route)?;
    if !server.client_server_endpoint.is_empty() {
        writeln!(
            out,
            "Endpoint = {}",
            endpoint(&server.client_server_endpoint, server.listen_port)
        )?;
    }
    if server.client_persistent_keepalive != 0 {
        writeln!(
            out,
            "PersistentKeepalive = {}",
            server.client_persistent_keepalive
        )?;
    }

    Ok(out)
}
