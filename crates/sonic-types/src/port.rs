//! Port classification as published in the port inventory.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a port known to the port inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    /// CPU port.
    Cpu,
    /// Front panel physical port.
    Phy,
    /// VLAN interface.
    Vlan,
    /// Link aggregation group (PortChannel).
    Lag,
    /// Tunnel port.
    Tunnel,
    /// System port on a chassis.
    System,
}

impl PortType {
    /// Ports an ingress ACL table can be bound to.
    pub const fn is_acl_bindable(&self) -> bool {
        matches!(self, PortType::Phy | PortType::Lag)
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortType::Cpu => "cpu",
            PortType::Phy => "phy",
            PortType::Vlan => "vlan",
            PortType::Lag => "lag",
            PortType::Tunnel => "tunnel",
            PortType::System => "system",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PortType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(PortType::Cpu),
            "phy" => Ok(PortType::Phy),
            "vlan" => Ok(PortType::Vlan),
            "lag" => Ok(PortType::Lag),
            "tunnel" => Ok(PortType::Tunnel),
            "system" => Ok(PortType::System),
            _ => Err(ParseError::InvalidPortType(s.to_string())),
        }
    }
}

/// Role of a port in the switch fabric, from the `role` field of the PORT table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PortRole {
    /// External facing port (default).
    #[default]
    Ext,
    /// Internal fabric port.
    Int,
    /// Inband management port.
    Inb,
    /// Recycle port.
    Rec,
    /// Port facing a DPU (data plane card).
    Dpc,
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortRole::Ext => "Ext",
            PortRole::Int => "Int",
            PortRole::Inb => "Inb",
            PortRole::Rec => "Rec",
            PortRole::Dpc => "Dpc",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PortRole {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ext" => Ok(PortRole::Ext),
            "Int" => Ok(PortRole::Int),
            "Inb" => Ok(PortRole::Inb),
            "Rec" => Ok(PortRole::Rec),
            "Dpc" => Ok(PortRole::Dpc),
            _ => Err(ParseError::InvalidPortRole(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_acl_bindable() {
        assert!(PortType::Phy.is_acl_bindable());
        assert!(PortType::Lag.is_acl_bindable());
        assert!(!PortType::Cpu.is_acl_bindable());
        assert!(!PortType::Vlan.is_acl_bindable());
    }

    #[test]
    fn test_port_type_parse() {
        assert_eq!("PHY".parse::<PortType>().unwrap(), PortType::Phy);
        assert_eq!("lag".parse::<PortType>().unwrap(), PortType::Lag);
        assert!("bogus".parse::<PortType>().is_err());
    }

    #[test]
    fn test_port_role_round_trip() {
        let role: PortRole = "Dpc".parse().unwrap();
        assert_eq!(role, PortRole::Dpc);
        assert_eq!(role.to_string(), "Dpc");
        assert_eq!(PortRole::default(), PortRole::Ext);
        assert!("dpc".parse::<PortRole>().is_err());
    }
}
