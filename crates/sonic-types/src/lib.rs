//! Common SONiC value types used by the DASH orchestration agents.
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`IpAddress`]: IPv4 and IPv6 addresses
//! - [`IpPrefix`]: IP network prefixes (CIDR notation)
//! - [`PortType`] / [`PortRole`]: switch port classifications

mod ip;
mod mac;
mod port;

pub use ip::{IpAddress, IpPrefix};
pub use mac::MacAddress;
pub use port::{PortRole, PortType};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid port type: {0}")]
    InvalidPortType(String),

    #[error("invalid port role: {0}")]
    InvalidPortRole(String),
}
