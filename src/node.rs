//! Identity of the host a registry server runs on.

use std::net::{IpAddr, Ipv4Addr};
use tracing::warn;

use crate::config::RegistryConfig;
use crate::error::Error;
use crate::model::Node;

/// Reduce a hostname to a single lowercase DNS label.
///
/// Node names become `<node>.nodes.<zone>`, so anything after the first dot
/// is dropped.
pub fn normalize_name(name: &str) -> Result<String, Error> {
    let lower = name.trim().trim_end_matches('.').to_ascii_lowercase();
    let short = match lower.split_once('.') {
        Some((first, _)) => {
            warn!(hostname = %lower, node = %first, "node name truncated to first label");
            first.to_string()
        }
        None => lower,
    };
    if short.is_empty() {
        return Err(Error::Identity(format!("unusable node name: {name:?}")));
    }
    Ok(short)
}

/// Primary local IPv4 address.
pub fn local_ipv4() -> Result<Ipv4Addr, Error> {
    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(addr)) => Ok(addr),
        Ok(IpAddr::V6(addr)) => Err(Error::Identity(format!(
            "primary address {addr} is not IPv4; set an explicit node address"
        ))),
        Err(e) => Err(Error::Identity(format!("local address lookup failed: {e}"))),
    }
}

fn local_hostname() -> Result<String, Error> {
    hostname::get()
        .map_err(|e| Error::Identity(format!("hostname lookup failed: {e}")))?
        .into_string()
        .map_err(|raw| Error::Identity(format!("hostname is not UTF-8: {raw:?}")))
}

/// Resolve the local node from config, falling back to the host's name and address.
pub fn resolve(config: &RegistryConfig) -> Result<Node, Error> {
    let name = match &config.node_name {
        Some(name) => name.clone(),
        None => local_hostname()?,
    };
    let address = match config.node_ip {
        Some(addr) => addr,
        None => local_ipv4()?,
    };
    Ok(Node::new(normalize_name(&name)?, address))
}
