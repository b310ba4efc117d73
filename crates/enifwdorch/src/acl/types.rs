//! ACL enums and field names.

use std::fmt;
use std::str::FromStr;

/// Field names of an ACL_TABLE_TYPE entry.
pub const ACL_TABLE_TYPE_MATCHES: &str = "MATCHES";
pub const ACL_TABLE_TYPE_ACTIONS: &str = "ACTIONS";
pub const ACL_TABLE_TYPE_BIND_POINTS: &str = "BIND_POINTS";

/// Field names of an ACL_TABLE entry.
pub const ACL_TABLE_DESCRIPTION: &str = "policy_desc";
pub const ACL_TABLE_TYPE: &str = "type";
pub const ACL_TABLE_STAGE: &str = "stage";
pub const ACL_TABLE_PORTS: &str = "ports";

/// Field name of a rule's priority.
pub const RULE_PRIORITY: &str = "PRIORITY";

/// ACL stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AclStage {
    #[default]
    Ingress,
    Egress,
}

impl fmt::Display for AclStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "INGRESS"),
            Self::Egress => write!(f, "EGRESS"),
        }
    }
}

impl FromStr for AclStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INGRESS" => Ok(Self::Ingress),
            "EGRESS" => Ok(Self::Egress),
            _ => Err(format!("Unknown ACL stage: {}", s)),
        }
    }
}

/// Object kinds an ACL table can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclBindPointType {
    Port,
    PortChannel,
}

impl fmt::Display for AclBindPointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port => write!(f, "PORT"),
            Self::PortChannel => write!(f, "PORTCHANNEL"),
        }
    }
}

impl FromStr for AclBindPointType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PORT" => Ok(Self::Port),
            "PORTCHANNEL" | "LAG" => Ok(Self::PortChannel),
            _ => Err(format!("Unknown ACL bind point type: {}", s)),
        }
    }
}

/// Match fields of an ENI redirect rule.
///
/// The `Display` form is also the rule field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AclMatchField {
    TunnelVni,
    DstIp,
    InnerSrcMac,
    InnerDstMac,
    TunnelTerm,
}

impl fmt::Display for AclMatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TunnelVni => write!(f, "TUNNEL_VNI"),
            Self::DstIp => write!(f, "DST_IP"),
            Self::InnerSrcMac => write!(f, "INNER_SRC_MAC"),
            Self::InnerDstMac => write!(f, "INNER_DST_MAC"),
            Self::TunnelTerm => write!(f, "TUNNEL_TERM"),
        }
    }
}

impl FromStr for AclMatchField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TUNNEL_VNI" => Ok(Self::TunnelVni),
            "DST_IP" => Ok(Self::DstIp),
            "INNER_SRC_MAC" => Ok(Self::InnerSrcMac),
            "INNER_DST_MAC" => Ok(Self::InnerDstMac),
            "TUNNEL_TERM" => Ok(Self::TunnelTerm),
            _ => Err(format!("Unknown ACL match field: {}", s)),
        }
    }
}

/// Actions of an ENI redirect rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclActionType {
    /// Redirect to a next hop, written as `<ip>` or `<ip>@<tunnel>`.
    RedirectAction,
}

impl fmt::Display for AclActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RedirectAction => write!(f, "REDIRECT_ACTION"),
        }
    }
}

impl FromStr for AclActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REDIRECT_ACTION" => Ok(Self::RedirectAction),
            _ => Err(format!("Unknown ACL action: {}", s)),
        }
    }
}
