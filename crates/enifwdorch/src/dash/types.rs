//! ENI forwarding types, table schema names and errors.

use serde::{Deserialize, Serialize};
use sonic_orch_common::{TaskError, TaskStatus};
use sonic_types::{IpAddress, MacAddress, PortRole, PortType};
use std::fmt;

use crate::acl::AclMatchField;

/// APPL_DB table carrying the ENI forwarding intent.
pub const ENI_FWD_TABLE: &str = "DASH_ENI_FORWARD_TABLE";

pub const ENI_FWD_VDPU_IDS: &str = "vdpu_ids";
pub const ENI_FWD_PRIMARY: &str = "primary_vdpu";
pub const ENI_FWD_OUT_VNI: &str = "outbound_vni";
pub const ENI_FWD_OUT_MAC_LOOKUP: &str = "outbound_eni_mac_lookup";

pub const DPU_TYPE: &str = "type";
pub const DPU_STATE: &str = "state";
pub const DPU_PA_V4: &str = "pa_ipv4";
pub const DPU_PA_V6: &str = "pa_ipv6";
pub const DPU_NPU_V4: &str = "npu_ipv4";
pub const DPU_NPU_V6: &str = "npu_ipv6";

pub const ENI_REDIRECT_TABLE_TYPE: &str = "ENI_REDIRECT";
pub const ENI_REDIRECT_TABLE: &str = "ENI";
pub const ENI_REDIRECT_TABLE_DESC: &str = "Contains Rule for DASH ENI Based Forwarding";

pub const DEFAULT_BASE_PRIORITY: u32 = 9996;

/// Identity of an ENI: the VNET it lives in and its MAC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EniKey {
    pub vnet: String,
    pub mac: MacAddress,
}

impl EniKey {
    pub fn new(vnet: impl Into<String>, mac: MacAddress) -> Self {
        Self {
            vnet: vnet.into(),
            mac,
        }
    }

    /// Parses `<vnet><sep><mac>`, splitting at the first separator.
    pub fn parse(key: &str, separator: char) -> Result<Self> {
        let (vnet, mac) = key
            .split_once(separator)
            .ok_or_else(|| EniFwdError::InvalidKey(key.to_string()))?;
        if vnet.is_empty() {
            return Err(EniFwdError::InvalidKey(key.to_string()));
        }
        let mac = mac
            .parse::<MacAddress>()
            .map_err(|_| EniFwdError::InvalidKey(key.to_string()))?;
        Ok(Self::new(vnet, mac))
    }

    /// Name of one of this ENI's rules inside `table`.
    pub fn rule_key(&self, table: &str, rule_type: RuleType) -> String {
        format!("{}:{}_{}_{}", table, self.vnet, self.mac.to_key(), rule_type.suffix())
    }
}

impl fmt::Display for EniKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vnet, self.mac)
    }
}

/// Whether a DPU is hosted behind this NPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DpuType {
    Local,
    Cluster,
}

impl DpuType {
    /// Only the literal `local` is local; anything else is a cluster DPU.
    pub fn from_config(value: Option<&str>) -> Self {
        match value {
            Some("local") => DpuType::Local,
            _ => DpuType::Cluster,
        }
    }
}

impl fmt::Display for DpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DpuType::Local => write!(f, "local"),
            DpuType::Cluster => write!(f, "cluster"),
        }
    }
}

/// Role of a redirect rule within an ENI.
///
/// Declaration order is the priority ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleType {
    Inbound,
    Outbound,
    InboundTerm,
    OutboundTerm,
}

impl RuleType {
    pub const ALL: [RuleType; 4] = [
        RuleType::Inbound,
        RuleType::Outbound,
        RuleType::InboundTerm,
        RuleType::OutboundTerm,
    ];

    pub const fn ordinal(&self) -> u32 {
        match self {
            RuleType::Inbound => 0,
            RuleType::Outbound => 1,
            RuleType::InboundTerm => 2,
            RuleType::OutboundTerm => 3,
        }
    }

    pub const fn suffix(&self) -> &'static str {
        match self {
            RuleType::Inbound => "IN",
            RuleType::Outbound => "OUT",
            RuleType::InboundTerm => "IN_TERM",
            RuleType::OutboundTerm => "OUT_TERM",
        }
    }

    /// Tunnel termination rules always target the local DPU.
    pub const fn is_term(&self) -> bool {
        matches!(self, RuleType::InboundTerm | RuleType::OutboundTerm)
    }

    /// Outbound rules need the outbound VNI.
    pub const fn is_outbound(&self) -> bool {
        matches!(self, RuleType::Outbound | RuleType::OutboundTerm)
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Install state of a redirect rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RuleState {
    #[default]
    Pending,
    Installed,
    Uninstalled,
    /// Terminal until the ENI is deleted and created again
    Failed,
}

impl fmt::Display for RuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleState::Pending => write!(f, "pending"),
            RuleState::Installed => write!(f, "installed"),
            RuleState::Uninstalled => write!(f, "uninstalled"),
            RuleState::Failed => write!(f, "failed"),
        }
    }
}

/// Reachability of a next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EndpointStatus {
    Resolved,
    #[default]
    Unresolved,
}

/// Which inner MAC the outbound rule matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MacDirection {
    #[default]
    SrcMac,
    DstMac,
}

impl MacDirection {
    /// `dst` selects the destination MAC; anything else keeps the default.
    pub fn from_config(value: Option<&str>) -> Self {
        match value {
            Some("dst") => MacDirection::DstMac,
            _ => MacDirection::SrcMac,
        }
    }

    pub const fn match_field(&self) -> AclMatchField {
        match self {
            MacDirection::SrcMac => AclMatchField::InnerSrcMac,
            MacDirection::DstMac => AclMatchField::InnerDstMac,
        }
    }
}

/// Neighbor identity used for reachability queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NextHopKey {
    pub ip: IpAddress,
    pub alias: String,
}

impl NextHopKey {
    pub fn new(ip: IpAddress, alias: impl Into<String>) -> Self {
        Self {
            ip,
            alias: alias.into(),
        }
    }
}

impl fmt::Display for NextHopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ip, self.alias)
    }
}

/// A neighbor add or remove reported by the neighbor subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborUpdate {
    pub key: NextHopKey,
    pub add: bool,
}

impl NeighborUpdate {
    pub fn added(key: NextHopKey) -> Self {
        Self { key, add: true }
    }

    pub fn removed(key: NextHopKey) -> Self {
        Self { key, add: false }
    }
}

/// One port as seen by the port inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub port_type: PortType,
    #[serde(default)]
    pub role: PortRole,
    /// Member ports, for LAGs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

impl PortEntry {
    pub fn new(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            role: PortRole::default(),
            members: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: PortRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_members(mut self, members: impl IntoIterator<Item = String>) -> Self {
        self.members.extend(members);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EniFwdError {
    #[error("Missing mandatory field: {0}")]
    MissingField(String),
    #[error("Invalid value for {field}: {value}")]
    Parse { field: String, value: String },
    #[error("Invalid ENI key: {0}")]
    InvalidKey(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("VIP not available: {0}")]
    MissingVip(String),
    #[error("ACL backend error: {0}")]
    AclBackend(String),
    #[error("Tunnel backend error: {0}")]
    TunnelBackend(String),
}

impl EniFwdError {
    /// Backend failures and a missing VIP clear up on their own; bad input does not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EniFwdError::AclBackend(_) | EniFwdError::TunnelBackend(_) | EniFwdError::MissingVip(_)
        )
    }

    pub fn to_status(&self) -> TaskStatus {
        if self.is_retryable() {
            TaskStatus::NeedRetry
        } else {
            TaskStatus::InvalidEntry
        }
    }
}

impl From<TaskError> for EniFwdError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::MissingField { field } => EniFwdError::MissingField(field),
            TaskError::InvalidField { field, value } => EniFwdError::Parse { field, value },
            TaskError::InvalidKey { key } => EniFwdError::InvalidKey(key),
        }
    }
}

pub type Result<T> = std::result::Result<T, EniFwdError>;
