//! Connection access control
//!
//! Checks the peer address of each accepted connection against the
//! configured CIDR allow list before any request is read.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use pasteport_shared::{Error, Result};

/// Allow list used when nothing is configured
pub const DEFAULT_ALLOW: &str = "0.0.0.0/0,::/0";

/// A parsed CIDR range for either address family
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CidrRange {
    V4 { network: u32, mask: u32 },
    V6 { network: u128, mask: u128 },
}

impl CidrRange {
    /// Parse `addr/len`, or a bare address as a host route
    pub fn parse(cidr: &str) -> Result<Self> {
        let cidr = cidr.trim();
        let (addr, prefix_len) = match cidr.split_once('/') {
            Some((addr, len)) => {
                let len: u32 = len
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid prefix length in '{}'", cidr)))?;
                (addr, Some(len))
            }
            None => (cidr, None),
        };

        let ip = IpAddr::from_str(addr)
            .map_err(|_| Error::Config(format!("invalid address in '{}'", cidr)))?;

        match ip {
            IpAddr::V4(v4) => {
                let len = prefix_len.unwrap_or(32);
                if len > 32 {
                    return Err(Error::Config(format!("prefix length out of range in '{}'", cidr)));
                }
                let mask = if len == 0 { 0 } else { !0u32 << (32 - len) };
                Ok(CidrRange::V4 {
                    network: u32::from(v4) & mask,
                    mask,
                })
            }
            IpAddr::V6(v6) => {
                let len = prefix_len.unwrap_or(128);
                if len > 128 {
                    return Err(Error::Config(format!("prefix length out of range in '{}'", cidr)));
                }
                let mask = if len == 0 { 0 } else { !0u128 << (128 - len) };
                Ok(CidrRange::V6 {
                    network: u128::from(v6) & mask,
                    mask,
                })
            }
        }
    }

    /// Check if an IP address is within this CIDR range
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self, canonical(ip)) {
            (CidrRange::V4 { network, mask }, IpAddr::V4(v4)) => (u32::from(v4) & mask) == *network,
            (CidrRange::V6 { network, mask }, IpAddr::V6(v6)) => (u128::from(v6) & mask) == *network,
            _ => false,
        }
    }

    fn is_universal(&self) -> bool {
        match self {
            CidrRange::V4 { mask, .. } => *mask == 0,
            CidrRange::V6 { mask, .. } => *mask == 0,
        }
    }
}

impl std::fmt::Display for CidrRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CidrRange::V4 { network, mask } => {
                write!(f, "{}/{}", Ipv4Addr::from(*network), mask.count_ones())
            }
            CidrRange::V6 { network, mask } => {
                write!(f, "{}/{}", Ipv6Addr::from(*network), mask.count_ones())
            }
        }
    }
}

/// Treat IPv4-mapped IPv6 peers (dual-stack sockets) as IPv4
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        v4 => v4,
    }
}

/// Set of prefixes allowed to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    ranges: Vec<CidrRange>,
}

impl AllowList {
    /// Parse a comma separated list such as `"10.0.0.0/8,::1"`
    pub fn parse(list: &str) -> Result<Self> {
        let ranges = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(CidrRange::parse)
            .collect::<Result<Vec<_>>>()?;

        if ranges.is_empty() {
            return Err(Error::Config("allow list is empty".to_string()));
        }
        Ok(Self { ranges })
    }

    /// Matches every address of both families
    pub fn allow_all() -> Self {
        Self {
            ranges: vec![
                CidrRange::V4 { network: 0, mask: 0 },
                CidrRange::V6 { network: 0, mask: 0 },
            ],
        }
    }

    /// Check if a peer may connect
    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|cidr| cidr.contains(ip))
    }

    /// True when the list admits every address of both families
    pub fn is_universal(&self) -> bool {
        let v4 = self
            .ranges
            .iter()
            .any(|r| matches!(r, CidrRange::V4 { .. }) && r.is_universal());
        let v6 = self
            .ranges
            .iter()
            .any(|r| matches!(r, CidrRange::V6 { .. }) && r.is_universal());
        v4 && v6
    }

    pub fn ranges(&self) -> &[CidrRange] {
        &self.ranges
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl FromStr for AllowList {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for AllowList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.ranges.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

/// What a rejected peer sees before the connection closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RejectPolicy {
    /// Close without writing anything
    #[default]
    Silent,
    /// Write one `denied` response, then close
    Notify,
}

impl FromStr for RejectPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "silent" => Ok(RejectPolicy::Silent),
            "notify" => Ok(RejectPolicy::Notify),
            other => Err(Error::Config(format!("unknown reject policy '{}'", other))),
        }
    }
}
