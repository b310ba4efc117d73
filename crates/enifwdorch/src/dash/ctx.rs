//! Collaborator interface and the shared context handed to every ENI.

use log::{debug, info, warn};
use sonic_orch_common::FieldValue;
use sonic_types::{IpAddress, IpPrefix, PortRole};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::dpu::DpuRegistry;
use super::tunnel::TunnelNhTable;
use super::types::{EniFwdError, NextHopKey, PortEntry, Result};

/// Everything the orch needs from the rest of the system.
///
/// Lookups return `None` when the object does not exist yet; the orch
/// treats that as "not ready" and retries on a later event. Backend writes
/// return the backend's error message.
pub trait EniFwdCallbacks: Send + Sync {
    /// Alias of the router interface the address is reachable through.
    fn router_intf_alias(&self, ip: &IpAddress) -> Option<String>;

    fn is_neighbor_resolved(&self, nh: &NextHopKey) -> bool;

    /// Asks the neighbor subsystem to resolve `nh`. Completion is reported
    /// later as a neighbor update.
    fn resolve_neighbor(&self, nh: &NextHopKey);

    fn vnet_vni(&self, vnet: &str) -> Option<u32>;

    /// Name of the VXLAN tunnel used by `vnet`.
    fn vnet_tunnel(&self, vnet: &str) -> Option<String>;

    fn create_tunnel_nexthop(&self, tunnel: &str, ip: &IpAddress) -> std::result::Result<u64, String>;

    fn remove_tunnel_nexthop(&self, tunnel: &str, ip: &IpAddress) -> std::result::Result<(), String>;

    fn set_acl_table_type(&self, name: &str, fvs: &[FieldValue]) -> std::result::Result<(), String>;

    fn set_acl_table(&self, name: &str, fvs: &[FieldValue]) -> std::result::Result<(), String>;

    fn set_acl_rule(&self, key: &str, fvs: &[FieldValue]) -> std::result::Result<(), String>;

    fn delete_acl_rule(&self, key: &str) -> std::result::Result<(), String>;

    /// Current port inventory.
    fn ports(&self) -> Vec<PortEntry>;

    /// Rows of the DPU table as `(id, field-values)`.
    fn dpu_table(&self) -> Vec<(String, Vec<FieldValue>)>;

    /// Keys of the VIP table.
    fn vip_table(&self) -> Vec<String>;
}

/// Counts of rule writes and deletes issued to the ACL backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleStats {
    pub installed: u64,
    pub uninstalled: u64,
}

/// State shared by all ENIs of one orch.
pub struct EniFwdCtx {
    callbacks: Arc<dyn EniFwdCallbacks>,
    pub dpus: DpuRegistry,
    pub tunnels: TunnelNhTable,
    pub rule_stats: RuleStats,
    alias_cache: HashMap<IpAddress, String>,
    vip: Option<IpPrefix>,
    rule_table: String,
    base_priority: u32,
}

impl EniFwdCtx {
    pub fn new(callbacks: Arc<dyn EniFwdCallbacks>, rule_table: &str, base_priority: u32) -> Self {
        Self {
            callbacks,
            dpus: DpuRegistry::new(),
            tunnels: TunnelNhTable::new(),
            rule_stats: RuleStats::default(),
            alias_cache: HashMap::new(),
            vip: None,
            rule_table: rule_table.to_string(),
            base_priority,
        }
    }

    pub fn callbacks(&self) -> &dyn EniFwdCallbacks {
        self.callbacks.as_ref()
    }

    /// ACL table the redirect rules live in.
    pub fn rule_table(&self) -> &str {
        &self.rule_table
    }

    pub fn base_priority(&self) -> u32 {
        self.base_priority
    }

    /// Reloads the DPU registry from the DPU table.
    pub fn populate_dpus(&mut self) -> usize {
        let rows = self.callbacks.dpu_table();
        self.dpus
            .populate(rows.iter().map(|(key, fvs)| (key.as_str(), fvs.as_slice())))
    }

    /// Router interface alias for `ip`, cached after the first hit.
    pub fn alias(&mut self, ip: &IpAddress) -> Option<String> {
        if let Some(alias) = self.alias_cache.get(ip) {
            return Some(alias.clone());
        }
        let alias = self.callbacks.router_intf_alias(ip)?;
        debug!("Router interface for {} is {}", ip, alias);
        self.alias_cache.insert(*ip, alias.clone());
        Some(alias)
    }

    pub fn is_neighbor_resolved(&self, nh: &NextHopKey) -> bool {
        self.callbacks.is_neighbor_resolved(nh)
    }

    pub fn resolve_neighbor(&self, nh: &NextHopKey) {
        debug!("Requesting neighbor resolution for {}", nh);
        self.callbacks.resolve_neighbor(nh);
    }

    pub fn vnet_vni(&self, vnet: &str) -> Option<u32> {
        self.callbacks.vnet_vni(vnet)
    }

    pub fn vnet_tunnel(&self, vnet: &str) -> Option<String> {
        self.callbacks.vnet_tunnel(vnet)
    }

    pub fn acquire_tunnel_nh(&mut self, ip: IpAddress, tunnel: &str) -> Result<u64> {
        self.tunnels.acquire(self.callbacks.as_ref(), ip, tunnel)
    }

    pub fn release_tunnel_nh(&mut self, ip: IpAddress, tunnel: &str) -> Result<()> {
        self.tunnels.release(self.callbacks.as_ref(), ip, tunnel)
    }

    /// The appliance VIP, read from the first VIP table key and then cached.
    pub fn vip(&mut self) -> Result<IpPrefix> {
        if let Some(vip) = self.vip {
            return Ok(vip);
        }

        let keys = self.callbacks.vip_table();
        let first = keys
            .first()
            .ok_or_else(|| EniFwdError::MissingVip("VIP table is empty".to_string()))?;
        let vip: IpPrefix = first
            .parse()
            .map_err(|_| EniFwdError::MissingVip(format!("malformed VIP {}", first)))?;

        info!("VIP found: {}", vip);
        self.vip = Some(vip);
        Ok(vip)
    }

    /// Ports the redirect table binds to.
    ///
    /// PHY and LAG ports, minus LAG members and ports facing a DPU.
    pub fn acl_bind_points(&self) -> BTreeSet<String> {
        let ports = self.callbacks.ports();
        let lag_members: HashSet<&str> = ports
            .iter()
            .flat_map(|p| p.members.iter().map(String::as_str))
            .collect();

        ports
            .iter()
            .filter(|p| p.port_type.is_acl_bindable())
            .filter(|p| p.role != PortRole::Dpc)
            .filter(|p| !lag_members.contains(p.name.as_str()))
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn set_acl_table_type(&self, name: &str, fvs: &[FieldValue]) -> Result<()> {
        self.callbacks
            .set_acl_table_type(name, fvs)
            .map_err(|e| EniFwdError::AclBackend(format!("table type {}: {}", name, e)))
    }

    pub fn set_acl_table(&self, name: &str, fvs: &[FieldValue]) -> Result<()> {
        self.callbacks
            .set_acl_table(name, fvs)
            .map_err(|e| EniFwdError::AclBackend(format!("table {}: {}", name, e)))
    }

    pub fn set_acl_rule(&mut self, key: &str, fvs: &[FieldValue]) -> Result<()> {
        self.callbacks
            .set_acl_rule(key, fvs)
            .map_err(|e| EniFwdError::AclBackend(format!("set rule {}: {}", key, e)))?;
        self.rule_stats.installed = self.rule_stats.installed.saturating_add(1);
        Ok(())
    }

    pub fn delete_acl_rule(&mut self, key: &str) -> Result<()> {
        self.callbacks
            .delete_acl_rule(key)
            .map_err(|e| EniFwdError::AclBackend(format!("delete rule {}: {}", key, e)))?;
        self.rule_stats.uninstalled = self.rule_stats.uninstalled.saturating_add(1);
        Ok(())
    }

    pub(crate) fn warn_unknown_dpu(&self, id: u64) {
        if self.dpus.get(id).is_none() {
            warn!("DPU {} is not in the DPU table", id);
        }
    }
}
