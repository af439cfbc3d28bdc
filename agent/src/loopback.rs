//! Loopback address translation for opened URIs
//!
//! A client on another machine that asks to open `http://localhost:8000/`
//! means its own loopback interface. The agent rewrites the host to the
//! client's address as seen from this side of the connection.

use std::net::IpAddr;

use url::{Host, Url};

/// Replace a loopback host in `uri` with `peer`.
///
/// URIs that do not parse, have no host, or name a non-loopback host come
/// back byte-for-byte unchanged.
pub fn translate_loopback(uri: &str, peer: IpAddr) -> String {
    let Ok(mut url) = Url::parse(uri) else {
        return uri.to_string();
    };
    if !is_loopback_host(url.host()) {
        return uri.to_string();
    }

    let peer = match peer {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(peer),
        v4 => v4,
    };
    match url.set_ip_host(peer) {
        Ok(()) => url.into(),
        Err(()) => uri.to_string(),
    }
}

fn is_loopback_host(host: Option<Host<&str>>) -> bool {
    match host {
        Some(Host::Domain(name)) => name.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
