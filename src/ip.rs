//! IP utilities (§4.A): CIDR list parsing and trusted-proxy-aware client IP
//! resolution.

use std::net::IpAddr;
use std::str::FromStr;

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use ipnet::IpNet;

/// Parse a list of CIDR strings (or bare IPs, treated as host networks) into
/// `IpNet`s.
pub fn parse_cidrs(list: &[String]) -> Result<Vec<IpNet>> {
    list.iter()
        .map(|s| parse_one(s).with_context(|| format!("invalid CIDR or IP: {s}")))
        .collect()
}

fn parse_one(s: &str) -> Result<IpNet> {
    if let Ok(net) = IpNet::from_str(s) {
        return Ok(net);
    }
    let ip = IpAddr::from_str(s)?;
    Ok(IpNet::from(ip))
}

fn is_trusted(peer: IpAddr, trusted_proxies: &[IpNet]) -> bool {
    trusted_proxies.iter().any(|net| net.contains(&peer))
}

/// Resolve the client's true IP, honoring a trusted-proxy allowlist.
///
/// Header-based overrides (`custom_header` or `X-Forwarded-For`) are only
/// consulted when `peer` is itself a trusted proxy — this is the security
/// invariant from §4.A and must never be weakened.
pub fn get_client_ip(
    peer: IpAddr,
    headers: &HeaderMap,
    trusted_proxies: &[IpNet],
    custom_header: Option<&str>,
) -> IpAddr {
    if trusted_proxies.is_empty() || !is_trusted(peer, trusted_proxies) {
        return peer;
    }

    if let Some(name) = custom_header {
        if !name.is_empty() {
            if let Some(ip) = first_valid_ip(headers, name) {
                return ip;
            }
        }
    }

    if let Some(ip) = leftmost_valid_ip(headers, "x-forwarded-for") {
        return ip;
    }

    peer
}

fn first_valid_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    let value = headers.get(name)?.to_str().ok()?;
    value
        .split(',')
        .map(str::trim)
        .find_map(|s| IpAddr::from_str(s).ok())
}

fn leftmost_valid_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    let value = headers.get(name)?.to_str().ok()?;
    value
        .split(',')
        .map(str::trim)
        .find_map(|s| IpAddr::from_str(s).ok())
}
