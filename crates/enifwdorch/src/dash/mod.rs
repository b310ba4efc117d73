//! DASH ENI based forwarding.
//!
//! Each ENI of the `DASH_ENI_FORWARD_TABLE` is hosted on one or more DPUs,
//! one of which is primary. The orch installs up to four ACL redirect rules
//! per ENI that steer its traffic to the primary DPU, or to the local DPU
//! for tunnel terminated traffic.

mod ctx;
mod dpu;
mod eni;
mod nexthop;
mod orch;
mod rule;
mod tunnel;
mod types;

pub use ctx::{EniFwdCallbacks, EniFwdCtx, RuleStats};
pub use dpu::{DpuInfo, DpuRegistry};
pub use eni::{EniAttrs, EniInfo};
pub use nexthop::{EniNextHop, LocalNextHop, RemoteNextHop};
pub use orch::{DashEniFwdOrch, DashEniFwdOrchConfig, DashEniFwdOrchStats};
pub use rule::{EniAclRule, UpdateType};
pub use tunnel::{TunnelNhEntry, TunnelNhKey, TunnelNhStats, TunnelNhTable};
pub use types::{
    DpuType, EndpointStatus, EniFwdError, EniKey, MacDirection, NeighborUpdate, NextHopKey,
    PortEntry, Result, RuleState, RuleType, DEFAULT_BASE_PRIORITY, DPU_NPU_V4, DPU_NPU_V6,
    DPU_PA_V4, DPU_PA_V6, DPU_STATE, DPU_TYPE, ENI_FWD_OUT_MAC_LOOKUP, ENI_FWD_OUT_VNI,
    ENI_FWD_PRIMARY, ENI_FWD_TABLE, ENI_FWD_VDPU_IDS, ENI_REDIRECT_TABLE, ENI_REDIRECT_TABLE_DESC,
    ENI_REDIRECT_TABLE_TYPE,
};
