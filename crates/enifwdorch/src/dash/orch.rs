//! DashEniFwdOrch: turns ENI forwarding intent into ACL redirect rules.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use sonic_orch_common::{
    Consumer, ConsumerConfig, KeyOpFieldsValues, Operation, Orch, TaskStatus,
};
use sonic_types::IpAddress;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::ctx::{EniFwdCallbacks, EniFwdCtx};
use super::eni::EniInfo;
use super::types::{
    EniFwdError, EniKey, NeighborUpdate, NextHopKey, Result, RuleState, RuleType,
    DEFAULT_BASE_PRIORITY, ENI_FWD_TABLE, ENI_REDIRECT_TABLE, ENI_REDIRECT_TABLE_DESC,
    ENI_REDIRECT_TABLE_TYPE,
};
use crate::acl::{create_eni_redirect_table_type, AclTable};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;

#[derive(Debug, Clone)]
pub struct DashEniFwdOrchConfig {
    /// Priority of the inbound rule; the other roles follow it
    pub base_priority: u32,
    pub acl_table: String,
    pub acl_table_type: String,
    /// Separator between VNET and MAC in the table key
    pub key_separator: char,
}

impl Default for DashEniFwdOrchConfig {
    fn default() -> Self {
        Self {
            base_priority: DEFAULT_BASE_PRIORITY,
            acl_table: ENI_REDIRECT_TABLE.to_string(),
            acl_table_type: ENI_REDIRECT_TABLE_TYPE.to_string(),
            key_separator: ':',
        }
    }
}

impl DashEniFwdOrchConfig {
    pub fn with_base_priority(mut self, base_priority: u32) -> Self {
        self.base_priority = base_priority;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashEniFwdOrchStats {
    pub enis_created: u64,
    pub enis_updated: u64,
    pub enis_removed: u64,
    pub rules_installed: u64,
    pub rules_uninstalled: u64,
    pub neighbor_updates: u64,
    pub errors: u64,
}

/// Reconciler for the ENI forwarding table.
pub struct DashEniFwdOrch {
    config: DashEniFwdOrchConfig,
    stats: DashEniFwdOrchStats,
    ctx: EniFwdCtx,
    consumer: Consumer,
    enis: HashMap<EniKey, EniInfo>,
    /// PA of each local DPU to its id
    neigh_dpu_map: HashMap<IpAddress, u64>,
    /// Local DPU id to the ENIs hosted on it
    dpu_eni_map: HashMap<u64, BTreeSet<EniKey>>,
    initialized: bool,
}

impl DashEniFwdOrch {
    pub fn new(config: DashEniFwdOrchConfig, callbacks: Arc<dyn EniFwdCallbacks>) -> Self {
        let ctx = EniFwdCtx::new(callbacks, &config.acl_table, config.base_priority);
        Self {
            config,
            stats: DashEniFwdOrchStats::default(),
            ctx,
            consumer: Consumer::new(ConsumerConfig::new(ENI_FWD_TABLE)),
            enis: HashMap::new(),
            neigh_dpu_map: HashMap::new(),
            dpu_eni_map: HashMap::new(),
            initialized: false,
        }
    }

    pub fn config(&self) -> &DashEniFwdOrchConfig {
        &self.config
    }

    pub fn stats(&self) -> DashEniFwdOrchStats {
        DashEniFwdOrchStats {
            rules_installed: self.ctx.rule_stats.installed,
            rules_uninstalled: self.ctx.rule_stats.uninstalled,
            ..self.stats
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Queues table entries for the next [`Orch::do_task`].
    pub fn add_entries(&mut self, entries: Vec<KeyOpFieldsValues>) {
        self.consumer.add_to_sync(entries);
    }

    pub fn get_eni(&self, key: &EniKey) -> Option<&EniInfo> {
        self.enis.get(key)
    }

    pub fn eni_count(&self) -> usize {
        self.enis.len()
    }

    pub fn rule_state(&self, key: &EniKey, rule_type: RuleType) -> Option<RuleState> {
        self.enis.get(key)?.rule_state(rule_type)
    }

    /// References held on the tunnel next hop `ip@tunnel`.
    pub fn tunnel_ref_count(&self, ip: IpAddress, tunnel: &str) -> u32 {
        self.ctx.tunnels.ref_count(ip, tunnel)
    }

    pub fn tunnel_nh_count(&self) -> usize {
        self.ctx.tunnels.len()
    }

    pub fn enis_for_dpu(&self, dpu_id: u64) -> Vec<EniKey> {
        self.dpu_eni_map
            .get(&dpu_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Loads DPUs, provisions the ACL table and asks for the local DPU neighbors.
    ///
    /// Runs once. A failure leaves the orch uninitialized so the next event retries.
    pub fn ensure_initialized(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let dpus = self.ctx.populate_dpus();
        info!("Loaded {} DPUs", dpus);

        let table_type = create_eni_redirect_table_type(&self.config.acl_table_type);
        self.ctx
            .set_acl_table_type(&table_type.name, &table_type.to_field_values())?;

        let ports = self.ctx.acl_bind_points();
        let table = AclTable::new(&self.config.acl_table, &self.config.acl_table_type)
            .with_description(ENI_REDIRECT_TABLE_DESC)
            .with_ports(ports);
        if let Err(e) = self.ctx.set_acl_table(&table.name, &table.to_field_values()) {
            audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, "DashEniFwdOrch", "create_acl_table")
                .with_object_id(table.name.clone())
                .with_object_type("acl_table")
                .with_error(e.to_string()));
            return Err(e);
        }
        audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, "DashEniFwdOrch", "create_acl_table")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(table.name.clone())
            .with_object_type("acl_table")
            .with_details(serde_json::json!({
                "type": table.type_name,
                "ports": table.ports.iter().collect::<Vec<_>>(),
            })));

        let locals: Vec<(u64, IpAddress)> = self
            .ctx
            .dpus
            .locals()
            .filter_map(|d| d.pa().map(|pa| (d.id, pa)))
            .collect();
        for (id, pa) in locals {
            self.neigh_dpu_map.insert(pa, id);
            let Some(alias) = self.ctx.alias(&pa) else {
                warn!("No router interface for local DPU {} PA {}", id, pa);
                debug!("Rules on DPU {} wait for a neighbor event for {}", id, pa);
                continue;
            };
            let nh = NextHopKey::new(pa, alias);
            if self.ctx.is_neighbor_resolved(&nh) {
                warn!("Neighbor {} of DPU {} already resolved", nh, id);
            } else {
                self.ctx.resolve_neighbor(&nh);
            }
        }

        self.initialized = true;
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "DashEniFwdOrch", "initialize")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "dpus": dpus,
                "local_dpus": self.neigh_dpu_map.len(),
            })));
        Ok(())
    }

    /// Creates the ENI or applies an update to it.
    pub fn add_or_update(&mut self, key: EniKey, entry: &KeyOpFieldsValues) -> Result<()> {
        self.ensure_initialized()?;

        if let Some(eni) = self.enis.get_mut(&key) {
            eni.update(entry, &mut self.ctx)?;
            self.stats.enis_updated = self.stats.enis_updated.saturating_add(1);
            return Ok(());
        }

        let mut eni = EniInfo::new(key.clone(), entry, &self.ctx)?;
        if let Err(e) = eni.create(&mut self.ctx) {
            match eni.destroy(&mut self.ctx) {
                Ok(()) => {
                    warn!("Discarded ENI {} after failed create: {}", key, e);
                    return Err(e);
                }
                Err(cleanup) => {
                    error!("Keeping ENI {} after failed cleanup: {}", key, cleanup);
                    self.insert_eni(key, eni);
                    return Err(e);
                }
            }
        }

        self.insert_eni(key, eni);
        self.stats.enis_created = self.stats.enis_created.saturating_add(1);
        Ok(())
    }

    fn insert_eni(&mut self, key: EniKey, eni: EniInfo) {
        if let Some(dpu) = eni.local_endpoint(&self.ctx.dpus) {
            debug!("ENI {} hosted on local DPU {}", key, dpu);
            self.dpu_eni_map.entry(dpu).or_default().insert(key.clone());
        }
        self.enis.insert(key, eni);
    }

    /// Removes the ENI and its rules. Unknown keys are ignored.
    pub fn delete(&mut self, key: &EniKey) -> Result<()> {
        let Some(eni) = self.enis.get_mut(key) else {
            info!("ENI {} not found, nothing to delete", key);
            return Ok(());
        };

        eni.destroy(&mut self.ctx)?;

        self.enis.remove(key);
        self.dpu_eni_map.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
        self.stats.enis_removed = self.stats.enis_removed.saturating_add(1);
        info!("Removed ENI {}", key);
        Ok(())
    }

    /// Re-fires the ENIs hosted on the DPU owning the neighbor address.
    ///
    /// Every ENI is visited; the first error is returned.
    pub fn handle_neighbor_update(&mut self, update: &NeighborUpdate) -> Result<()> {
        let Some(&dpu_id) = self.neigh_dpu_map.get(&update.key.ip) else {
            return Ok(());
        };
        self.stats.neighbor_updates = self.stats.neighbor_updates.saturating_add(1);

        let keys: Vec<EniKey> = self.enis_for_dpu(dpu_id);
        debug!(
            "Neighbor {} of DPU {} {}, {} ENIs",
            update.key,
            dpu_id,
            if update.add { "added" } else { "removed" },
            keys.len()
        );

        let mut first_err = None;
        for key in keys {
            let Some(eni) = self.enis.get_mut(&key) else {
                continue;
            };
            if let Err(e) = eni.on_neighbor_update(update, &mut self.ctx) {
                error!("Neighbor update failed for ENI {}: {}", key, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn process_entry(&mut self, entry: &KeyOpFieldsValues) -> Result<()> {
        let key = EniKey::parse(&entry.key, self.config.key_separator)?;
        match entry.op {
            Operation::Set => self.add_or_update(key, entry),
            Operation::Del => self.delete(&key),
        }
    }

    fn record_error(&mut self, entry: &KeyOpFieldsValues, err: &EniFwdError) {
        self.stats.errors = self.stats.errors.saturating_add(1);
        audit_log!(AuditRecord::new(AuditCategory::ErrorCondition, "DashEniFwdOrch", "process_entry")
            .with_object_id(entry.key.clone())
            .with_object_type("eni")
            .with_error(err.to_string()));
    }
}

#[async_trait]
impl Orch for DashEniFwdOrch {
    fn name(&self) -> &str {
        "DashEniFwdOrch"
    }

    async fn do_task(&mut self) {
        let entries = self.consumer.drain();
        let mut retries = Vec::new();
        // Keys with an entry waiting for retry; later entries for them wait too.
        let mut blocked: HashSet<String> = HashSet::new();

        for entry in entries {
            if blocked.contains(&entry.key) {
                retries.push(entry);
                continue;
            }

            let Err(e) = self.process_entry(&entry) else {
                continue;
            };
            self.record_error(&entry, &e);
            match e.to_status() {
                TaskStatus::NeedRetry => {
                    warn!("Retrying {} later: {}", entry.key, e);
                    blocked.insert(entry.key.clone());
                    retries.push(entry);
                }
                status => error!("Dropping {} ({:?}): {}", entry.key, status, e),
            }
        }

        for entry in retries.into_iter().rev() {
            self.consumer.retry(entry);
        }
    }

    fn has_pending_tasks(&self) -> bool {
        self.consumer.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.consumer.dump()
    }
}
