//! ENI aggregate: configuration plus the redirect rules derived from it.

use log::{debug, error, info, warn};
use std::collections::BTreeMap;

use super::ctx::EniFwdCtx;
use super::dpu::DpuRegistry;
use super::rule::EniAclRule;
use super::types::{
    EniFwdError, EniKey, MacDirection, NeighborUpdate, Result, RuleState, RuleType,
    ENI_FWD_OUT_MAC_LOOKUP, ENI_FWD_OUT_VNI, ENI_FWD_PRIMARY, ENI_FWD_VDPU_IDS,
};
use sonic_orch_common::KeyOpFieldsValues;

/// Configuration of an ENI that rules are computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EniAttrs {
    pub key: EniKey,
    /// DPUs hosting the ENI
    pub ep_list: Vec<u64>,
    pub primary_id: u64,
    pub outbound_vni: Option<u32>,
    pub mac_dir: MacDirection,
}

impl EniAttrs {
    /// First local DPU of the endpoint list.
    pub fn local_endpoint(&self, dpus: &DpuRegistry) -> Option<u64> {
        let mut locals = self
            .ep_list
            .iter()
            .copied()
            .filter(|id| dpus.get(*id).is_some_and(|d| d.is_local()));
        let first = locals.next()?;
        if locals.next().is_some() {
            warn!("ENI {} has more than one local DPU, using {}", self.key, first);
        }
        Some(first)
    }
}

#[derive(Debug)]
pub struct EniInfo {
    attrs: EniAttrs,
    rules: BTreeMap<RuleType, EniAclRule>,
    /// Set when the last fire hit an error, so an unchanged update still re-fires
    needs_refire: bool,
}

impl EniInfo {
    /// Validates the declaration and builds the rule set.
    ///
    /// Inbound is always present, termination rules need a local DPU and
    /// outbound rules need the outbound VNI.
    pub fn new(key: EniKey, entry: &KeyOpFieldsValues, ctx: &EniFwdCtx) -> Result<Self> {
        let ep_list: Vec<u64> = entry
            .parse_list(ENI_FWD_VDPU_IDS)?
            .filter(|ids| !ids.is_empty())
            .ok_or_else(|| EniFwdError::MissingField(ENI_FWD_VDPU_IDS.to_string()))?;
        let primary_id: u64 = entry.require_field(ENI_FWD_PRIMARY)?;

        let mac_dir = MacDirection::from_config(entry.get_field(ENI_FWD_OUT_MAC_LOOKUP));
        let outbound_vni = match entry.parse_field::<u32>(ENI_FWD_OUT_VNI)? {
            Some(vni) => Some(vni),
            None => ctx.vnet_vni(&key.vnet),
        };
        if outbound_vni.is_none() {
            error!("No outbound VNI for ENI {}, outbound rules are not created", key);
        }

        for id in &ep_list {
            ctx.warn_unknown_dpu(*id);
        }

        let attrs = EniAttrs {
            key,
            ep_list,
            primary_id,
            outbound_vni,
            mac_dir,
        };

        let has_local = attrs.local_endpoint(&ctx.dpus).is_some();
        let rules = RuleType::ALL
            .into_iter()
            .filter(|t| !t.is_term() || has_local)
            .filter(|t| !t.is_outbound() || attrs.outbound_vni.is_some())
            .map(|t| {
                let rule = EniAclRule::new(t, attrs.key.rule_key(ctx.rule_table(), t));
                (t, rule)
            })
            .collect();

        Ok(Self {
            attrs,
            rules,
            needs_refire: false,
        })
    }

    pub fn key(&self) -> &EniKey {
        &self.attrs.key
    }

    pub fn attrs(&self) -> &EniAttrs {
        &self.attrs
    }

    pub fn rule(&self, rule_type: RuleType) -> Option<&EniAclRule> {
        self.rules.get(&rule_type)
    }

    pub fn rules(&self) -> impl Iterator<Item = &EniAclRule> {
        self.rules.values()
    }

    pub fn rule_state(&self, rule_type: RuleType) -> Option<RuleState> {
        self.rules.get(&rule_type).map(EniAclRule::state)
    }

    pub fn local_endpoint(&self, dpus: &DpuRegistry) -> Option<u64> {
        self.attrs.local_endpoint(dpus)
    }

    pub fn create(&mut self, ctx: &mut EniFwdCtx) -> Result<()> {
        info!(
            "Creating ENI {} with {} rules, primary {}",
            self.attrs.key,
            self.rules.len(),
            self.attrs.primary_id
        );
        self.fire_all(ctx)
    }

    /// Applies a new declaration. Only the primary DPU may change.
    pub fn update(&mut self, entry: &KeyOpFieldsValues, ctx: &mut EniFwdCtx) -> Result<()> {
        let primary_id: u64 = entry.require_field(ENI_FWD_PRIMARY)?;

        if primary_id == self.attrs.primary_id {
            if !self.needs_refire {
                debug!("ENI {} unchanged", self.attrs.key);
                return Ok(());
            }
        } else {
            info!(
                "ENI {} primary {} -> {}",
                self.attrs.key, self.attrs.primary_id, primary_id
            );
            self.attrs.primary_id = primary_id;
        }

        self.fire_all(ctx)
    }

    pub fn on_neighbor_update(&mut self, update: &NeighborUpdate, ctx: &mut EniFwdCtx) -> Result<()> {
        if !update.add {
            // Installed rules are removed by the delete of the ENI before the
            // neighbor goes away.
            info!(
                "Neighbor {} removed, ENI {} rules are left as is",
                update.key, self.attrs.key
            );
            return Ok(());
        }
        debug!("Neighbor {} added, re-firing ENI {}", update.key, self.attrs.key);
        self.fire_all(ctx)
    }

    /// Removes every rule. Rules are kept on failure so the delete can be retried.
    pub fn destroy(&mut self, ctx: &mut EniFwdCtx) -> Result<()> {
        let mut first_err = None;
        for rule in self.rules.values_mut() {
            if let Err(e) = rule.destroy(ctx) {
                error!("Failed to remove rule {}: {}", rule.key(), e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                self.rules.clear();
                Ok(())
            }
        }
    }

    /// Fires every rule, visiting all of them even after an error.
    fn fire_all(&mut self, ctx: &mut EniFwdCtx) -> Result<()> {
        let mut first_err = None;
        for rule in self.rules.values_mut() {
            if let Err(e) = rule.fire(&self.attrs, ctx) {
                error!("Failed to fire rule {}: {}", rule.key(), e);
                first_err.get_or_insert(e);
            }
        }
        self.needs_refire = first_err.is_some();
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::ReplayBackend;
    use pretty_assertions::assert_eq;
    use sonic_types::IpAddress;
    use std::sync::Arc;

    fn ip(s: &str) -> IpAddress {
        s.parse().unwrap()
    }

    fn create_test_backend() -> Arc<ReplayBackend> {
        let backend = Arc::new(ReplayBackend::new());
        backend.add_dpu(1, "local", "10.0.0.1", "20.0.0.1");
        backend.add_dpu(2, "cluster", "10.0.0.2", "20.0.0.2");
        backend.add_dpu(3, "cluster", "10.0.0.3", "20.0.0.3");
        backend.add_vip("10.2.0.1/32");
        backend.add_vnet("Vnet_1000", Some(1234), Some("mock_tunnel"));
        backend.add_router_interface(ip("10.0.0.1"), "Vlan1000");
        backend
    }

    fn create_test_ctx(backend: &Arc<ReplayBackend>) -> EniFwdCtx {
        let mut ctx = EniFwdCtx::new(backend.clone(), "ENI", 9996);
        ctx.populate_dpus();
        ctx
    }

    fn create_test_entry(fields: &[(&str, &str)]) -> KeyOpFieldsValues {
        KeyOpFieldsValues::set(
            "Vnet_1000:aa:bb:cc:dd:ee:ff",
            fields
                .iter()
                .map(|(f, v)| (f.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn create_test_key() -> EniKey {
        EniKey::new("Vnet_1000", "aa:bb:cc:dd:ee:ff".parse().unwrap())
    }

    fn rule_types(eni: &EniInfo) -> Vec<RuleType> {
        eni.rules().map(EniAclRule::rule_type).collect()
    }

    #[test]
    fn test_rule_set_with_local_dpu() {
        let backend = create_test_backend();
        let ctx = create_test_ctx(&backend);
        let entry = create_test_entry(&[("vdpu_ids", "1,2"), ("primary_vdpu", "1")]);

        let eni = EniInfo::new(create_test_key(), &entry, &ctx).unwrap();
        assert_eq!(rule_types(&eni), RuleType::ALL.to_vec());
        assert_eq!(eni.attrs().outbound_vni, Some(1234));
        assert_eq!(eni.local_endpoint(&ctx.dpus), Some(1));
    }

    #[test]
    fn test_rule_set_without_local_dpu() {
        let backend = create_test_backend();
        let ctx = create_test_ctx(&backend);
        let entry = create_test_entry(&[("vdpu_ids", "2,3"), ("primary_vdpu", "3")]);

        let eni = EniInfo::new(create_test_key(), &entry, &ctx).unwrap();
        assert_eq!(rule_types(&eni), vec![RuleType::Inbound, RuleType::Outbound]);
    }

    #[test]
    fn test_first_local_dpu_wins() {
        let backend = create_test_backend();
        backend.add_dpu(4, "local", "10.0.0.4", "20.0.0.4");
        let ctx = create_test_ctx(&backend);
        let entry = create_test_entry(&[("vdpu_ids", "4,1"), ("primary_vdpu", "1")]);

        let eni = EniInfo::new(create_test_key(), &entry, &ctx).unwrap();
        assert_eq!(eni.local_endpoint(&ctx.dpus), Some(4));
        assert_eq!(rule_types(&eni), RuleType::ALL.to_vec());
    }

    #[test]
    fn test_rule_set_without_vni() {
        let backend = Arc::new(ReplayBackend::new());
        backend.add_dpu(1, "local", "10.0.0.1", "20.0.0.1");
        let ctx = create_test_ctx(&backend);
        let entry = create_test_entry(&[("vdpu_ids", "1"), ("primary_vdpu", "1")]);

        let eni = EniInfo::new(create_test_key(), &entry, &ctx).unwrap();
        assert_eq!(rule_types(&eni), vec![RuleType::Inbound, RuleType::InboundTerm]);
        assert_eq!(eni.attrs().outbound_vni, None);
    }

    #[test]
    fn test_explicit_vni_and_mac_lookup() {
        let backend = create_test_backend();
        let ctx = create_test_ctx(&backend);
        let entry = create_test_entry(&[
            ("vdpu_ids", "2"),
            ("primary_vdpu", "2"),
            ("outbound_vni", "5678"),
            ("outbound_eni_mac_lookup", "dst"),
        ]);

        let eni = EniInfo::new(create_test_key(), &entry, &ctx).unwrap();
        assert_eq!(eni.attrs().outbound_vni, Some(5678));
        assert_eq!(eni.attrs().mac_dir, MacDirection::DstMac);
    }

    #[test]
    fn test_mandatory_fields() {
        let backend = create_test_backend();
        let ctx = create_test_ctx(&backend);

        let no_primary = create_test_entry(&[("vdpu_ids", "1,2")]);
        assert_eq!(
            EniInfo::new(create_test_key(), &no_primary, &ctx).unwrap_err(),
            EniFwdError::MissingField("primary_vdpu".to_string())
        );

        let no_ids = create_test_entry(&[("primary_vdpu", "1")]);
        assert!(matches!(
            EniInfo::new(create_test_key(), &no_ids, &ctx),
            Err(EniFwdError::MissingField(_))
        ));

        let empty_ids = create_test_entry(&[("vdpu_ids", ""), ("primary_vdpu", "1")]);
        assert!(matches!(
            EniInfo::new(create_test_key(), &empty_ids, &ctx),
            Err(EniFwdError::MissingField(_))
        ));

        let bad_primary = create_test_entry(&[("vdpu_ids", "1"), ("primary_vdpu", "one")]);
        assert!(matches!(
            EniInfo::new(create_test_key(), &bad_primary, &ctx),
            Err(EniFwdError::Parse { .. })
        ));
    }

    #[test]
    fn test_update_primary_refires() {
        let backend = create_test_backend();
        backend.set_neighbor_resolved(ip("10.0.0.1"));
        let mut ctx = create_test_ctx(&backend);
        let entry = create_test_entry(&[("vdpu_ids", "1,2"), ("primary_vdpu", "1")]);
        let mut eni = EniInfo::new(create_test_key(), &entry, &ctx).unwrap();
        eni.create(&mut ctx).unwrap();
        assert_eq!(backend.acl_rules().len(), 4);

        backend.clear_journal();
        eni.update(&entry, &mut ctx).unwrap();
        assert!(backend.journal().is_empty());

        let switched = create_test_entry(&[("vdpu_ids", "1,2"), ("primary_vdpu", "2")]);
        eni.update(&switched, &mut ctx).unwrap();
        let rules = backend.acl_rules();
        assert_eq!(rules["ENI:Vnet_1000_AABBCCDDEEFF_IN"]["REDIRECT_ACTION"], "20.0.0.2@mock_tunnel");
        assert_eq!(rules["ENI:Vnet_1000_AABBCCDDEEFF_OUT"]["REDIRECT_ACTION"], "20.0.0.2@mock_tunnel");
        assert_eq!(rules["ENI:Vnet_1000_AABBCCDDEEFF_IN_TERM"]["REDIRECT_ACTION"], "10.0.0.1");
        assert_eq!(rules["ENI:Vnet_1000_AABBCCDDEEFF_OUT_TERM"]["REDIRECT_ACTION"], "10.0.0.1");
        assert_eq!(ctx.tunnels.ref_count(ip("20.0.0.2"), "mock_tunnel"), 2);
    }

    #[test]
    fn test_update_requires_primary() {
        let backend = create_test_backend();
        let mut ctx = create_test_ctx(&backend);
        let entry = create_test_entry(&[("vdpu_ids", "2"), ("primary_vdpu", "2")]);
        let mut eni = EniInfo::new(create_test_key(), &entry, &ctx).unwrap();
        eni.create(&mut ctx).unwrap();

        let no_primary = create_test_entry(&[("vdpu_ids", "2")]);
        assert!(matches!(
            eni.update(&no_primary, &mut ctx),
            Err(EniFwdError::MissingField(_))
        ));
    }

    #[test]
    fn test_neighbor_update() {
        let backend = create_test_backend();
        let mut ctx = create_test_ctx(&backend);
        let entry = create_test_entry(&[("vdpu_ids", "1,2"), ("primary_vdpu", "1")]);
        let mut eni = EniInfo::new(create_test_key(), &entry, &ctx).unwrap();
        eni.create(&mut ctx).unwrap();
        assert!(eni.rules().all(|r| r.state() == RuleState::Pending));

        let nh = backend.set_neighbor_resolved(ip("10.0.0.1")).unwrap();
        eni.on_neighbor_update(&NeighborUpdate::removed(nh.clone()), &mut ctx).unwrap();
        assert!(eni.rules().all(|r| r.state() == RuleState::Pending));

        eni.on_neighbor_update(&NeighborUpdate::added(nh), &mut ctx).unwrap();
        assert!(eni.rules().all(|r| r.state() == RuleState::Installed));
    }

    #[test]
    fn test_failed_fire_refires_on_same_update() {
        let backend = create_test_backend();
        backend.set_fail_tunnel_ops(true);
        let mut ctx = create_test_ctx(&backend);
        let entry = create_test_entry(&[("vdpu_ids", "2"), ("primary_vdpu", "2")]);
        let mut eni = EniInfo::new(create_test_key(), &entry, &ctx).unwrap();

        assert!(eni.create(&mut ctx).is_err());
        assert!(backend.acl_rules().is_empty());

        backend.set_fail_tunnel_ops(false);
        eni.update(&entry, &mut ctx).unwrap();
        assert_eq!(backend.acl_rules().len(), 2);
        assert_eq!(ctx.tunnels.ref_count(ip("20.0.0.2"), "mock_tunnel"), 2);
    }

    #[test]
    fn test_destroy() {
        let backend = create_test_backend();
        let mut ctx = create_test_ctx(&backend);
        let entry = create_test_entry(&[("vdpu_ids", "2,3"), ("primary_vdpu", "3")]);
        let mut eni = EniInfo::new(create_test_key(), &entry, &ctx).unwrap();
        eni.create(&mut ctx).unwrap();

        backend.set_fail_acl_ops(true);
        assert!(eni.destroy(&mut ctx).is_err());
        assert_eq!(eni.rules().count(), 2);

        backend.set_fail_acl_ops(false);
        eni.destroy(&mut ctx).unwrap();
        assert_eq!(eni.rules().count(), 0);
        assert!(backend.acl_rules().is_empty());
        assert!(ctx.tunnels.is_empty());
    }
}
