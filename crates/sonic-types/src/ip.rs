//! IP address and prefix types with safe parsing.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IP address that can be either IPv4 or IPv6.
///
/// Ordered so it can key sorted maps; every IPv4 address sorts before any
/// IPv6 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IpAddress {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl IpAddress {
    /// Returns true if this is an IPv4 address.
    pub const fn is_ipv4(&self) -> bool {
        matches!(self, IpAddress::V4(_))
    }

    /// Returns true if this is an IPv6 address.
    pub const fn is_ipv6(&self) -> bool {
        matches!(self, IpAddress::V6(_))
    }

    /// Returns the host prefix length for this address family.
    pub const fn max_prefix_len(&self) -> u8 {
        match self {
            IpAddress::V4(_) => 32,
            IpAddress::V6(_) => 128,
        }
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::V4(addr) => addr.fmt(f),
            IpAddress::V6(addr) => addr.fmt(f),
        }
    }
}

impl FromStr for IpAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<IpAddr>()
            .map(IpAddress::from)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl TryFrom<String> for IpAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpAddress> for String {
    fn from(addr: IpAddress) -> String {
        addr.to_string()
    }
}

impl From<IpAddr> for IpAddress {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => IpAddress::V4(v4),
            IpAddr::V6(v6) => IpAddress::V6(v6),
        }
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        IpAddress::V4(addr)
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        IpAddress::V6(addr)
    }
}

/// An IP network prefix in CIDR notation.
///
/// A bare address without `/len` parses as a host prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    addr: IpAddress,
    prefix_len: u8,
}

impl IpPrefix {
    /// Creates a prefix, rejecting lengths beyond the address family width.
    pub fn new(addr: IpAddress, prefix_len: u8) -> Result<Self, ParseError> {
        if prefix_len > addr.max_prefix_len() {
            return Err(ParseError::InvalidIpPrefix(format!("{}/{}", addr, prefix_len)));
        }
        Ok(Self { addr, prefix_len })
    }

    /// Creates a /32 or /128 prefix covering exactly `addr`.
    pub const fn host(addr: IpAddress) -> Self {
        Self {
            addr,
            prefix_len: addr.max_prefix_len(),
        }
    }

    pub const fn addr(&self) -> IpAddress {
        self.addr
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub const fn is_host(&self) -> bool {
        self.prefix_len == self.addr.max_prefix_len()
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidIpPrefix(s.to_string());
        match s.trim().split_once('/') {
            Some((addr, len)) => {
                let addr: IpAddress = addr.parse().map_err(|_| invalid())?;
                let len: u8 = len.parse().map_err(|_| invalid())?;
                IpPrefix::new(addr, len).map_err(|_| invalid())
            }
            None => s.parse::<IpAddress>().map(IpPrefix::host).map_err(|_| invalid()),
        }
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> String {
        prefix.to_string()
    }
}
