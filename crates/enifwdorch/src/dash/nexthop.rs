//! Redirect targets of ENI rules.
//!
//! A local next hop points at the PA of a DPU hosted behind this NPU and is
//! reachable once its neighbor entry resolves. A remote next hop points at
//! the NPU fronting a cluster DPU and goes through a shared tunnel next hop.

use log::{debug, info};
use sonic_types::IpAddress;

use super::ctx::EniFwdCtx;
use super::types::{DpuType, EndpointStatus, NextHopKey, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNextHop {
    endpoint: IpAddress,
    status: EndpointStatus,
}

impl LocalNextHop {
    pub fn new(endpoint: IpAddress) -> Self {
        Self {
            endpoint,
            status: EndpointStatus::Unresolved,
        }
    }

    /// Checks the neighbor of the PA, requesting resolution when missing.
    ///
    /// No router interface for the PA yet means not ready, not an error.
    pub fn resolve(&mut self, ctx: &mut EniFwdCtx) -> Result<()> {
        let Some(alias) = ctx.alias(&self.endpoint) else {
            debug!(
                "No router interface for {} yet, waiting for a neighbor event",
                self.endpoint
            );
            self.status = EndpointStatus::Unresolved;
            return Ok(());
        };

        let nh = NextHopKey::new(self.endpoint, alias);
        if ctx.is_neighbor_resolved(&nh) {
            self.status = EndpointStatus::Resolved;
        } else {
            ctx.resolve_neighbor(&nh);
            self.status = EndpointStatus::Unresolved;
        }
        Ok(())
    }

    pub fn redirect_target(&self) -> String {
        self.endpoint.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNextHop {
    endpoint: IpAddress,
    vnet: String,
    /// Tunnel the reference was taken on, set while a reference is held
    tunnel: Option<String>,
    status: EndpointStatus,
}

impl RemoteNextHop {
    pub fn new(endpoint: IpAddress, vnet: impl Into<String>) -> Self {
        Self {
            endpoint,
            vnet: vnet.into(),
            tunnel: None,
            status: EndpointStatus::Unresolved,
        }
    }

    /// Takes a reference on the tunnel next hop, at most once per instance.
    pub fn resolve(&mut self, ctx: &mut EniFwdCtx) -> Result<()> {
        if self.tunnel.is_some() {
            self.status = EndpointStatus::Resolved;
            return Ok(());
        }

        let Some(tunnel) = ctx.vnet_tunnel(&self.vnet) else {
            info!("Tunnel for VNET {} not found yet", self.vnet);
            self.status = EndpointStatus::Unresolved;
            return Ok(());
        };

        ctx.acquire_tunnel_nh(self.endpoint, &tunnel)?;
        self.tunnel = Some(tunnel);
        self.status = EndpointStatus::Resolved;
        Ok(())
    }

    /// `<npu>@<tunnel>`, or the bare address before the tunnel is known.
    pub fn redirect_target(&self) -> String {
        match &self.tunnel {
            Some(tunnel) => format!("{}@{}", self.endpoint, tunnel),
            None => self.endpoint.to_string(),
        }
    }

    pub fn tunnel(&self) -> Option<&str> {
        self.tunnel.as_deref()
    }

    /// Releases the tunnel reference. On failure the reference is kept.
    pub fn destroy(&mut self, ctx: &mut EniFwdCtx) -> Result<()> {
        if let Some(tunnel) = &self.tunnel {
            ctx.release_tunnel_nh(self.endpoint, tunnel)?;
        }
        self.tunnel = None;
        self.status = EndpointStatus::Unresolved;
        Ok(())
    }
}

/// Next hop of one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EniNextHop {
    Local(LocalNextHop),
    Remote(RemoteNextHop),
}

impl EniNextHop {
    pub fn new(dpu_type: DpuType, endpoint: IpAddress, vnet: &str) -> Self {
        match dpu_type {
            DpuType::Local => EniNextHop::Local(LocalNextHop::new(endpoint)),
            DpuType::Cluster => EniNextHop::Remote(RemoteNextHop::new(endpoint, vnet)),
        }
    }

    pub fn dpu_type(&self) -> DpuType {
        match self {
            EniNextHop::Local(_) => DpuType::Local,
            EniNextHop::Remote(_) => DpuType::Cluster,
        }
    }

    pub fn endpoint(&self) -> IpAddress {
        match self {
            EniNextHop::Local(nh) => nh.endpoint,
            EniNextHop::Remote(nh) => nh.endpoint,
        }
    }

    pub fn status(&self) -> EndpointStatus {
        match self {
            EniNextHop::Local(nh) => nh.status,
            EniNextHop::Remote(nh) => nh.status,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status() == EndpointStatus::Resolved
    }

    pub fn resolve(&mut self, ctx: &mut EniFwdCtx) -> Result<()> {
        match self {
            EniNextHop::Local(nh) => nh.resolve(ctx),
            EniNextHop::Remote(nh) => nh.resolve(ctx),
        }
    }

    pub fn redirect_target(&self) -> String {
        match self {
            EniNextHop::Local(nh) => nh.redirect_target(),
            EniNextHop::Remote(nh) => nh.redirect_target(),
        }
    }

    pub fn destroy(&mut self, ctx: &mut EniFwdCtx) -> Result<()> {
        match self {
            EniNextHop::Local(_) => Ok(()),
            EniNextHop::Remote(nh) => nh.destroy(ctx),
        }
    }
}
