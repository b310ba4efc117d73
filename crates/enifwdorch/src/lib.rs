//! SONiC DASH ENI forwarding orchestration.
//!
//! Translates the `DASH_ENI_FORWARD_TABLE` intent (which DPUs host an ENI and
//! which one is primary) into ACL redirect rules on the NPU.
//!
//! ```text
//! [DASH_ENI_FORWARD_TABLE] ──> [DashEniFwdOrch] ──> [ACL rules]  ──> ACL backend
//!                                  ▲     │
//!      neighbor updates ───────────┘     └──> [tunnel next hops]
//! ```
//!
//! # Key Components
//!
//! - [`dash::DashEniFwdOrch`]: consumer driven reconciler
//! - [`dash::EniFwdCallbacks`]: everything the orch needs from the rest of the system
//! - [`replay::ReplayBackend`]: in-memory collaborator for offline replay and tests

pub mod acl;
pub mod audit;
pub mod dash;
pub mod replay;

pub use dash::{DashEniFwdOrch, DashEniFwdOrchConfig, EniFwdCallbacks, EniFwdError};
