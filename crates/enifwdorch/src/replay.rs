//! Offline replay of ENI forwarding events.
//!
//! A [`Snapshot`] describes the state of the collaborators (DPUs, VIP, ports,
//! VNETs, router interfaces and resolved neighbors) and an ordered list of
//! events. [`ReplayBackend`] serves that state to the orch and records every
//! ACL and tunnel next hop write, so a snapshot can be replayed to see which
//! rules the orch would install.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use sonic_orch_common::{FieldValue, KeyOpFieldsValues, Orch};
use sonic_types::IpAddress;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::dash::{
    DashEniFwdOrch, DashEniFwdOrchConfig, DashEniFwdOrchStats, EniFwdCallbacks, NeighborUpdate,
    NextHopKey, PortEntry, DPU_NPU_V4, DPU_NPU_V6, DPU_PA_V4, DPU_PA_V6, DPU_TYPE,
};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VnetSpec {
    #[serde(default)]
    pub vni: Option<u32>,
    #[serde(default)]
    pub tunnel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterInterface {
    pub ip: IpAddress,
    pub alias: String,
}

/// One replayed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayEvent {
    EniSet {
        key: String,
        fields: BTreeMap<String, String>,
    },
    EniDel {
        key: String,
    },
    NeighborAdd {
        ip: IpAddress,
    },
    NeighborDel {
        ip: IpAddress,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// DPU table rows keyed by DPU id
    #[serde(default)]
    pub dpus: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub vips: Vec<String>,
    #[serde(default)]
    pub ports: Vec<PortEntry>,
    #[serde(default)]
    pub vnets: BTreeMap<String, VnetSpec>,
    #[serde(default)]
    pub router_interfaces: Vec<RouterInterface>,
    /// Neighbors that are already resolved when the replay starts
    #[serde(default)]
    pub neighbors: Vec<IpAddress>,
    #[serde(default)]
    pub events: Vec<ReplayEvent>,
}

impl Snapshot {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// A successful backend call, in call order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BackendOp {
    SetRule(String),
    DeleteRule(String),
    CreateTunnelNh(String),
    RemoveTunnelNh(String),
}

#[derive(Debug, Default)]
struct State {
    dpus: BTreeMap<String, BTreeMap<String, String>>,
    vips: Vec<String>,
    ports: Vec<PortEntry>,
    vnets: BTreeMap<String, VnetSpec>,
    router_interfaces: BTreeMap<IpAddress, String>,
    neighbors: BTreeSet<IpAddress>,
    alias_lookups: usize,
    resolve_requests: Vec<NextHopKey>,

    acl_table_types: BTreeMap<String, BTreeMap<String, String>>,
    acl_tables: BTreeMap<String, BTreeMap<String, String>>,
    acl_table_writes: usize,
    acl_rules: BTreeMap<String, BTreeMap<String, String>>,
    tunnel_nexthops: BTreeMap<String, u64>,
    next_oid: u64,
    journal: Vec<BackendOp>,

    fail_acl_ops: bool,
    fail_tunnel_ops: bool,
}

/// In-memory collaborator used by the replay binary and by tests.
#[derive(Debug, Default)]
pub struct ReplayBackend {
    state: Mutex<State>,
}

const TUNNEL_NH_OID_BASE: u64 = 0x4000_0000_0000;

fn to_map(fvs: &[FieldValue]) -> BTreeMap<String, String> {
    fvs.iter().cloned().collect()
}

impl ReplayBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend preloaded with the collaborator state of a snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.lock();
            state.dpus = snapshot.dpus.clone();
            state.vips = snapshot.vips.clone();
            state.ports = snapshot.ports.clone();
            state.vnets = snapshot.vnets.clone();
            state.router_interfaces = snapshot
                .router_interfaces
                .iter()
                .map(|rif| (rif.ip, rif.alias.clone()))
                .collect();
            state.neighbors = snapshot.neighbors.iter().copied().collect();
        }
        backend
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a DPU row; an empty NPU address is left out.
    pub fn add_dpu(&self, id: u64, dpu_type: &str, pa: &str, npu: &str) {
        let mut row = BTreeMap::new();
        row.insert(DPU_TYPE.to_string(), dpu_type.to_string());
        let (pa_field, npu_field) = if pa.contains(':') {
            (DPU_PA_V6, DPU_NPU_V6)
        } else {
            (DPU_PA_V4, DPU_NPU_V4)
        };
        row.insert(pa_field.to_string(), pa.to_string());
        if !npu.is_empty() {
            row.insert(npu_field.to_string(), npu.to_string());
        }
        self.lock().dpus.insert(id.to_string(), row);
    }

    pub fn add_vip(&self, vip: &str) {
        self.lock().vips.push(vip.to_string());
    }

    pub fn clear_vips(&self) {
        self.lock().vips.clear();
    }

    pub fn add_port(&self, port: PortEntry) {
        self.lock().ports.push(port);
    }

    pub fn add_vnet(&self, name: &str, vni: Option<u32>, tunnel: Option<&str>) {
        self.lock().vnets.insert(
            name.to_string(),
            VnetSpec {
                vni,
                tunnel: tunnel.map(str::to_string),
            },
        );
    }

    pub fn add_router_interface(&self, ip: IpAddress, alias: &str) {
        self.lock().router_interfaces.insert(ip, alias.to_string());
    }

    /// Marks the neighbor as resolved and returns its key, if a router
    /// interface covers the address.
    pub fn set_neighbor_resolved(&self, ip: IpAddress) -> Option<NextHopKey> {
        let mut state = self.lock();
        state.neighbors.insert(ip);
        state
            .router_interfaces
            .get(&ip)
            .map(|alias| NextHopKey::new(ip, alias.clone()))
    }

    pub fn clear_neighbor(&self, ip: IpAddress) -> Option<NextHopKey> {
        let mut state = self.lock();
        state.neighbors.remove(&ip);
        state
            .router_interfaces
            .get(&ip)
            .map(|alias| NextHopKey::new(ip, alias.clone()))
    }

    pub fn set_fail_acl_ops(&self, fail: bool) {
        self.lock().fail_acl_ops = fail;
    }

    pub fn set_fail_tunnel_ops(&self, fail: bool) {
        self.lock().fail_tunnel_ops = fail;
    }

    pub fn acl_rule(&self, key: &str) -> Option<BTreeMap<String, String>> {
        self.lock().acl_rules.get(key).cloned()
    }

    pub fn acl_rules(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.lock().acl_rules.clone()
    }

    pub fn acl_table(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.lock().acl_tables.get(name).cloned()
    }

    pub fn acl_table_type(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.lock().acl_table_types.get(name).cloned()
    }

    pub fn acl_table_writes(&self) -> usize {
        self.lock().acl_table_writes
    }

    /// Tunnel next hops as `ip@tunnel` to backend handle.
    pub fn tunnel_nexthops(&self) -> BTreeMap<String, u64> {
        self.lock().tunnel_nexthops.clone()
    }

    pub fn journal(&self) -> Vec<BackendOp> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    pub fn resolve_requests(&self) -> Vec<NextHopKey> {
        self.lock().resolve_requests.clone()
    }

    pub fn alias_lookups(&self) -> usize {
        self.lock().alias_lookups
    }
}

impl EniFwdCallbacks for ReplayBackend {
    fn router_intf_alias(&self, ip: &IpAddress) -> Option<String> {
        let mut state = self.lock();
        state.alias_lookups += 1;
        state.router_interfaces.get(ip).cloned()
    }

    fn is_neighbor_resolved(&self, nh: &NextHopKey) -> bool {
        let state = self.lock();
        state.neighbors.contains(&nh.ip)
            && state.router_interfaces.get(&nh.ip) == Some(&nh.alias)
    }

    fn resolve_neighbor(&self, nh: &NextHopKey) {
        self.lock().resolve_requests.push(nh.clone());
    }

    fn vnet_vni(&self, vnet: &str) -> Option<u32> {
        self.lock().vnets.get(vnet).and_then(|v| v.vni)
    }

    fn vnet_tunnel(&self, vnet: &str) -> Option<String> {
        self.lock().vnets.get(vnet).and_then(|v| v.tunnel.clone())
    }

    fn create_tunnel_nexthop(&self, tunnel: &str, ip: &IpAddress) -> Result<u64, String> {
        let mut state = self.lock();
        if state.fail_tunnel_ops {
            return Err("tunnel next hop create rejected".to_string());
        }
        let key = format!("{}@{}", ip, tunnel);
        if state.tunnel_nexthops.contains_key(&key) {
            return Err(format!("{} already exists", key));
        }
        state.next_oid += 1;
        let oid = TUNNEL_NH_OID_BASE + state.next_oid;
        state.tunnel_nexthops.insert(key.clone(), oid);
        state.journal.push(BackendOp::CreateTunnelNh(key));
        Ok(oid)
    }

    fn remove_tunnel_nexthop(&self, tunnel: &str, ip: &IpAddress) -> Result<(), String> {
        let mut state = self.lock();
        if state.fail_tunnel_ops {
            return Err("tunnel next hop remove rejected".to_string());
        }
        let key = format!("{}@{}", ip, tunnel);
        if state.tunnel_nexthops.remove(&key).is_none() {
            return Err(format!("{} does not exist", key));
        }
        state.journal.push(BackendOp::RemoveTunnelNh(key));
        Ok(())
    }

    fn set_acl_table_type(&self, name: &str, fvs: &[FieldValue]) -> Result<(), String> {
        let mut state = self.lock();
        if state.fail_acl_ops {
            return Err("ACL table type rejected".to_string());
        }
        state.acl_table_types.insert(name.to_string(), to_map(fvs));
        Ok(())
    }

    fn set_acl_table(&self, name: &str, fvs: &[FieldValue]) -> Result<(), String> {
        let mut state = self.lock();
        if state.fail_acl_ops {
            return Err("ACL table rejected".to_string());
        }
        state.acl_tables.insert(name.to_string(), to_map(fvs));
        state.acl_table_writes += 1;
        Ok(())
    }

    fn set_acl_rule(&self, key: &str, fvs: &[FieldValue]) -> Result<(), String> {
        let mut state = self.lock();
        if state.fail_acl_ops {
            return Err("ACL rule rejected".to_string());
        }
        state.acl_rules.insert(key.to_string(), to_map(fvs));
        state.journal.push(BackendOp::SetRule(key.to_string()));
        Ok(())
    }

    fn delete_acl_rule(&self, key: &str) -> Result<(), String> {
        let mut state = self.lock();
        if state.fail_acl_ops {
            return Err("ACL rule delete rejected".to_string());
        }
        if state.acl_rules.remove(key).is_none() {
            warn!("Delete of unknown ACL rule {}", key);
        }
        state.journal.push(BackendOp::DeleteRule(key.to_string()));
        Ok(())
    }

    fn ports(&self) -> Vec<PortEntry> {
        self.lock().ports.clone()
    }

    fn dpu_table(&self) -> Vec<(String, Vec<FieldValue>)> {
        self.lock()
            .dpus
            .iter()
            .map(|(id, row)| (id.clone(), row.clone().into_iter().collect()))
            .collect()
    }

    fn vip_table(&self) -> Vec<String> {
        self.lock().vips.clone()
    }
}

/// Backend tables and orch counters after a replay.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub acl_table_types: BTreeMap<String, BTreeMap<String, String>>,
    pub acl_tables: BTreeMap<String, BTreeMap<String, String>>,
    pub acl_rules: BTreeMap<String, BTreeMap<String, String>>,
    pub tunnel_nexthops: BTreeMap<String, String>,
    /// Entries still waiting for a retry
    pub pending: Vec<String>,
    pub stats: DashEniFwdOrchStats,
}

impl ReplayReport {
    fn collect(backend: &ReplayBackend, orch: &DashEniFwdOrch) -> Self {
        let state = backend.lock();
        Self {
            acl_table_types: state.acl_table_types.clone(),
            acl_tables: state.acl_tables.clone(),
            acl_rules: state.acl_rules.clone(),
            tunnel_nexthops: state
                .tunnel_nexthops
                .iter()
                .map(|(key, oid)| (key.clone(), format!("0x{:x}", oid)))
                .collect(),
            pending: orch.dump_pending_tasks(),
            stats: orch.stats(),
        }
    }
}

/// Replays every event of `snapshot` through a fresh orch.
///
/// Table events go through the consumer exactly as a live feed would, so
/// entries failing with a retryable error stay pending in the report.
pub async fn replay(snapshot: &Snapshot, config: DashEniFwdOrchConfig) -> ReplayReport {
    let backend = Arc::new(ReplayBackend::from_snapshot(snapshot));
    let mut orch = DashEniFwdOrch::new(config, backend.clone());

    for (idx, event) in snapshot.events.iter().enumerate() {
        match event {
            ReplayEvent::EniSet { key, fields } => {
                let fvs = fields
                    .iter()
                    .map(|(f, v)| (f.clone(), v.clone()))
                    .collect();
                orch.add_entries(vec![KeyOpFieldsValues::set(key.as_str(), fvs)]);
                orch.do_task().await;
            }
            ReplayEvent::EniDel { key } => {
                orch.add_entries(vec![KeyOpFieldsValues::del(key.as_str())]);
                orch.do_task().await;
            }
            ReplayEvent::NeighborAdd { ip } => match backend.set_neighbor_resolved(*ip) {
                Some(nh) => {
                    if let Err(e) = orch.handle_neighbor_update(&NeighborUpdate::added(nh)) {
                        warn!("Event {}: neighbor add {} failed: {}", idx, ip, e);
                    }
                }
                None => warn!("Event {}: no router interface for neighbor {}", idx, ip),
            },
            ReplayEvent::NeighborDel { ip } => {
                if let Some(nh) = backend.clear_neighbor(*ip) {
                    if let Err(e) = orch.handle_neighbor_update(&NeighborUpdate::removed(nh)) {
                        warn!("Event {}: neighbor del {} failed: {}", idx, ip, e);
                    }
                }
            }
        }
    }

    info!(
        "Replayed {} events, {} ENIs, {} pending",
        snapshot.events.len(),
        orch.eni_count(),
        orch.dump_pending_tasks().len()
    );
    ReplayReport::collect(&backend, &orch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sonic_types::PortType;

    #[test]
    fn test_snapshot_parse() {
        let json = r#"{
            "dpus": { "1": { "type": "local", "pa_ipv4": "10.0.0.1", "npu_ipv4": "20.0.0.1" } },
            "vips": ["10.2.0.1/32"],
            "ports": [{ "name": "Ethernet0", "type": "phy" }],
            "vnets": { "Vnet_1000": { "vni": 1234, "tunnel": "mock_tunnel" } },
            "router_interfaces": [{ "ip": "10.0.0.1", "alias": "Vlan1000" }],
            "events": [
                { "kind": "eni_set", "key": "Vnet_1000:aa:bb:cc:dd:ee:ff",
                  "fields": { "vdpu_ids": "1", "primary_vdpu": "1" } },
                { "kind": "neighbor_add", "ip": "10.0.0.1" },
                { "kind": "eni_del", "key": "Vnet_1000:aa:bb:cc:dd:ee:ff" }
            ]
        }"#;

        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.ports, vec![PortEntry::new("Ethernet0", PortType::Phy)]);
        assert_eq!(snapshot.vnets["Vnet_1000"].vni, Some(1234));
        assert!(snapshot.neighbors.is_empty());
        assert_eq!(snapshot.events.len(), 3);
        assert_eq!(
            snapshot.events[1],
            ReplayEvent::NeighborAdd {
                ip: "10.0.0.1".parse().unwrap()
            }
        );
    }

    #[test]
    fn test_backend_failures() {
        let backend = ReplayBackend::new();
        let ip: IpAddress = "20.0.0.2".parse().unwrap();

        backend.set_fail_acl_ops(true);
        assert!(backend.set_acl_rule("ENI:rule", &[]).is_err());
        assert!(backend.set_acl_table("ENI", &[]).is_err());

        backend.set_fail_tunnel_ops(true);
        assert!(backend.create_tunnel_nexthop("mock_tunnel", &ip).is_err());
        assert!(backend.journal().is_empty());

        backend.set_fail_tunnel_ops(false);
        backend.create_tunnel_nexthop("mock_tunnel", &ip).unwrap();
        assert!(backend.create_tunnel_nexthop("mock_tunnel", &ip).is_err());
        assert_eq!(backend.tunnel_nexthops().len(), 1);
    }

    #[test]
    fn test_neighbor_needs_router_interface() {
        let backend = ReplayBackend::new();
        let ip: IpAddress = "10.0.0.1".parse().unwrap();

        assert_eq!(backend.set_neighbor_resolved(ip), None);
        backend.add_router_interface(ip, "Vlan1000");
        let nh = backend.set_neighbor_resolved(ip).unwrap();
        assert!(backend.is_neighbor_resolved(&nh));
        assert!(!backend.is_neighbor_resolved(&NextHopKey::new(ip, "Vlan2000")));

        backend.clear_neighbor(ip);
        assert!(!backend.is_neighbor_resolved(&nh));
    }

    #[tokio::test]
    async fn test_demo_snapshot() {
        let snapshot: Snapshot =
            serde_json::from_str(include_str!("../demos/two_enis.json")).unwrap();
        let report = replay(&snapshot, DashEniFwdOrchConfig::default()).await;

        assert!(report.pending.is_empty());
        assert_eq!(report.acl_tables["ENI"]["ports"], "Ethernet0,PortChannel1011,PortChannel1012");
        assert_eq!(
            report.acl_rules.keys().cloned().collect::<Vec<_>>(),
            vec![
                "ENI:Vnet_1000_AABBCCDDEEFF_IN",
                "ENI:Vnet_1000_AABBCCDDEEFF_IN_TERM",
                "ENI:Vnet_1000_AABBCCDDEEFF_OUT",
                "ENI:Vnet_1000_AABBCCDDEEFF_OUT_TERM",
            ]
        );
        let out = &report.acl_rules["ENI:Vnet_1000_AABBCCDDEEFF_OUT"];
        assert_eq!(out["REDIRECT_ACTION"], "20.0.0.2@mock_tunnel");
        assert_eq!(out["INNER_DST_MAC"], "aa:bb:cc:dd:ee:ff");
        assert_eq!(
            report.tunnel_nexthops.keys().cloned().collect::<Vec<_>>(),
            vec!["20.0.0.2@mock_tunnel"]
        );
        assert_eq!(report.stats.enis_created, 2);
        assert_eq!(report.stats.enis_updated, 1);
        assert_eq!(report.stats.enis_removed, 1);
    }
}
