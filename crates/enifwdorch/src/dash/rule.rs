//! ACL redirect rule of one ENI role.
//!
//! ```text
//! Pending ──resolved+written──▶ Installed ──primary change──▶ Uninstalled
//!    │                              ▲                             │
//!    │ invalid endpoint             └────resolved+written─────────┘
//!    ▼
//!  Failed (terminal)
//! ```
//!
//! The ACL backend does not support modifying a rule in place, so a new
//! redirect target always means delete then write.

use log::{debug, error, info, warn};
use sonic_orch_common::FieldValue;
use sonic_types::IpAddress;

use super::ctx::EniFwdCtx;
use super::eni::EniAttrs;
use super::nexthop::EniNextHop;
use super::types::{DpuType, EniFwdError, Result, RuleState, RuleType};
use crate::acl::{AclActionType, AclMatchField, RULE_PRIORITY};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;

/// How a fire relates to the rule's current next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    /// No next hop yet
    Create,
    /// The intended endpoint moved to another DPU
    PrimaryUpdate,
    /// Installed and resolved on the intended endpoint
    Idempotent,
    /// Same endpoint, not installed yet
    Refresh,
    Invalid,
}

#[derive(Debug)]
pub struct EniAclRule {
    rule_type: RuleType,
    key: String,
    state: RuleState,
    nh: Option<EniNextHop>,
}

impl EniAclRule {
    pub fn new(rule_type: RuleType, key: String) -> Self {
        Self {
            rule_type,
            key,
            state: RuleState::Pending,
            nh: None,
        }
    }

    pub fn rule_type(&self) -> RuleType {
        self.rule_type
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> RuleState {
        self.state
    }

    pub fn next_hop(&self) -> Option<&EniNextHop> {
        self.nh.as_ref()
    }

    /// Endpoint this rule should redirect to.
    ///
    /// Termination rules follow the local DPU, the others follow the primary.
    fn intended_endpoint(&self, eni: &EniAttrs, ctx: &EniFwdCtx) -> Result<(DpuType, IpAddress)> {
        let id = if self.rule_type.is_term() {
            eni.local_endpoint(&ctx.dpus).ok_or_else(|| {
                EniFwdError::InvalidEndpoint(format!("{} has no local DPU", eni.key))
            })?
        } else {
            eni.primary_id
        };

        let dpu = ctx
            .dpus
            .get(id)
            .ok_or_else(|| EniFwdError::InvalidEndpoint(format!("DPU {} is unknown", id)))?;

        let addr = match dpu.dpu_type {
            DpuType::Local => dpu.pa(),
            DpuType::Cluster => dpu.npu(),
        };
        let addr = addr.ok_or_else(|| {
            EniFwdError::InvalidEndpoint(format!("DPU {} has no address for a {} next hop", id, dpu.dpu_type))
        })?;

        Ok((dpu.dpu_type, addr))
    }

    fn update_type(&self, intended: Option<(DpuType, IpAddress)>) -> UpdateType {
        let Some((dpu_type, addr)) = intended else {
            return UpdateType::Invalid;
        };
        match &self.nh {
            None => UpdateType::Create,
            Some(nh) if nh.dpu_type() != dpu_type || nh.endpoint() != addr => {
                UpdateType::PrimaryUpdate
            }
            Some(nh) if nh.is_resolved() && self.state == RuleState::Installed => {
                UpdateType::Idempotent
            }
            Some(_) => UpdateType::Refresh,
        }
    }

    /// Reconciles the rule with the ENI's current intent.
    ///
    /// Returns the resulting state. A backend error leaves the rule in the
    /// state it had before the failing step so the whole fire can be retried.
    pub fn fire(&mut self, eni: &EniAttrs, ctx: &mut EniFwdCtx) -> Result<RuleState> {
        if self.state == RuleState::Failed {
            debug!("Rule {} is failed, skipping", self.key);
            return Ok(self.state);
        }

        let intended = match self.intended_endpoint(eni, ctx) {
            Ok(intended) => Some(intended),
            Err(e) => {
                if self.state == RuleState::Pending {
                    error!("Rule {} failed: {}", self.key, e);
                    self.state = RuleState::Failed;
                } else {
                    warn!("Rule {} keeps state {}: {}", self.key, self.state, e);
                }
                None
            }
        };

        let update = self.update_type(intended);
        let Some((dpu_type, addr)) = intended else {
            return Ok(self.state);
        };
        if update == UpdateType::Idempotent {
            return Ok(self.state);
        }

        if self.state == RuleState::Installed && update == UpdateType::PrimaryUpdate {
            self.uninstall(ctx, AuditCategory::ResourceModify)?;
        }

        if matches!(update, UpdateType::Create | UpdateType::PrimaryUpdate) {
            if let Some(mut old) = self.nh.take() {
                if let Err(e) = old.destroy(ctx) {
                    self.nh = Some(old);
                    return Err(e);
                }
            }
            debug!("Rule {} next hop is now {} {}", self.key, dpu_type, addr);
            self.nh = Some(EniNextHop::new(dpu_type, addr, &eni.key.vnet));
        }

        let Some(nh) = self.nh.as_mut() else {
            return Ok(self.state);
        };
        nh.resolve(ctx)?;

        if !nh.is_resolved() {
            debug!("Rule {} waits for {} to resolve", self.key, nh.endpoint());
            self.state = RuleState::Pending;
            return Ok(self.state);
        }

        let target = nh.redirect_target();
        let fvs = self.build_fields(eni, ctx, &target)?;
        if let Err(e) = ctx.set_acl_rule(&self.key, &fvs) {
            audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, "DashEniFwdOrch", "install_rule")
                .with_object_id(self.key.clone())
                .with_object_type("acl_rule")
                .with_error(e.to_string()));
            return Err(e);
        }

        info!("Installed rule {} -> {}", self.key, target);
        audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, "DashEniFwdOrch", "install_rule")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(self.key.clone())
            .with_object_type("acl_rule")
            .with_details(serde_json::json!({
                "eni": eni.key.to_string(),
                "redirect": target,
                "update": format!("{:?}", update),
            })));
        self.state = RuleState::Installed;
        Ok(self.state)
    }

    /// Removes the rule from the backend and releases its next hop.
    ///
    /// Safe to call again after a failure.
    pub fn destroy(&mut self, ctx: &mut EniFwdCtx) -> Result<()> {
        if self.state == RuleState::Installed {
            self.uninstall(ctx, AuditCategory::ResourceDelete)?;
        }
        if let Some(mut nh) = self.nh.take() {
            if let Err(e) = nh.destroy(ctx) {
                self.nh = Some(nh);
                return Err(e);
            }
        }
        Ok(())
    }

    fn uninstall(&mut self, ctx: &mut EniFwdCtx, category: AuditCategory) -> Result<()> {
        if let Err(e) = ctx.delete_acl_rule(&self.key) {
            audit_log!(AuditRecord::new(category, "DashEniFwdOrch", "remove_rule")
                .with_object_id(self.key.clone())
                .with_object_type("acl_rule")
                .with_error(e.to_string()));
            return Err(e);
        }

        info!("Removed rule {}", self.key);
        audit_log!(AuditRecord::new(category, "DashEniFwdOrch", "remove_rule")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(self.key.clone())
            .with_object_type("acl_rule"));
        self.state = RuleState::Uninstalled;
        Ok(())
    }

    /// Field set written to the ACL rule table.
    ///
    /// Only the outbound rule follows `outbound_eni_mac_lookup`; OUT_TERM
    /// matches the inner destination MAC like the other roles.
    fn build_fields(&self, eni: &EniAttrs, ctx: &mut EniFwdCtx, target: &str) -> Result<Vec<FieldValue>> {
        let vip = ctx.vip()?;
        let priority = ctx.base_priority().saturating_add(self.rule_type.ordinal());

        let mac_field = match self.rule_type {
            RuleType::Outbound => eni.mac_dir.match_field(),
            _ => AclMatchField::InnerDstMac,
        };

        let mut fvs = vec![
            (RULE_PRIORITY.to_string(), priority.to_string()),
            (AclMatchField::DstIp.to_string(), vip.to_string()),
            (mac_field.to_string(), eni.key.mac.to_string()),
        ];

        if self.rule_type.is_outbound() {
            if let Some(vni) = eni.outbound_vni {
                fvs.push((AclMatchField::TunnelVni.to_string(), vni.to_string()));
            }
        }
        if self.rule_type.is_term() {
            fvs.push((AclMatchField::TunnelTerm.to_string(), "true".to_string()));
        }

        fvs.push((AclActionType::RedirectAction.to_string(), target.to_string()));
        Ok(fvs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dash::types::{EniKey, MacDirection};
    use crate::replay::{BackendOp, ReplayBackend};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
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

    fn create_test_attrs(ep_list: Vec<u64>, primary_id: u64) -> EniAttrs {
        EniAttrs {
            key: EniKey::new("Vnet_1000", "aa:bb:cc:dd:ee:ff".parse().unwrap()),
            ep_list,
            primary_id,
            outbound_vni: Some(1234),
            mac_dir: MacDirection::SrcMac,
        }
    }

    fn create_test_rule(attrs: &EniAttrs, rule_type: RuleType) -> EniAclRule {
        EniAclRule::new(rule_type, attrs.key.rule_key("ENI", rule_type))
    }

    fn rule_fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_local_rule_waits_then_installs() {
        let backend = create_test_backend();
        let mut ctx = create_test_ctx(&backend);
        let attrs = create_test_attrs(vec![1, 2], 1);
        let mut rule = create_test_rule(&attrs, RuleType::Inbound);

        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Pending);
        assert!(backend.acl_rules().is_empty());

        backend.set_neighbor_resolved(ip("10.0.0.1"));
        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Installed);
        assert_eq!(
            backend.acl_rule("ENI:Vnet_1000_AABBCCDDEEFF_IN"),
            Some(rule_fields(&[
                ("PRIORITY", "9996"),
                ("DST_IP", "10.2.0.1/32"),
                ("INNER_DST_MAC", "aa:bb:cc:dd:ee:ff"),
                ("REDIRECT_ACTION", "10.0.0.1"),
            ]))
        );
    }

    #[test]
    fn test_fire_is_idempotent() {
        let backend = create_test_backend();
        backend.set_neighbor_resolved(ip("10.0.0.1"));
        let mut ctx = create_test_ctx(&backend);
        let attrs = create_test_attrs(vec![1, 2], 1);
        let mut rule = create_test_rule(&attrs, RuleType::Outbound);

        rule.fire(&attrs, &mut ctx).unwrap();
        backend.clear_journal();
        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Installed);
        assert!(backend.journal().is_empty());
    }

    #[test]
    fn test_outbound_fields() {
        let backend = create_test_backend();
        let mut ctx = create_test_ctx(&backend);
        let attrs = create_test_attrs(vec![2, 3], 3);
        let mut rule = create_test_rule(&attrs, RuleType::Outbound);

        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Installed);
        assert_eq!(
            backend.acl_rule("ENI:Vnet_1000_AABBCCDDEEFF_OUT"),
            Some(rule_fields(&[
                ("PRIORITY", "9997"),
                ("DST_IP", "10.2.0.1/32"),
                ("INNER_SRC_MAC", "aa:bb:cc:dd:ee:ff"),
                ("TUNNEL_VNI", "1234"),
                ("REDIRECT_ACTION", "20.0.0.3@mock_tunnel"),
            ]))
        );
    }

    #[test]
    fn test_outbound_term_fields() {
        let backend = create_test_backend();
        backend.set_neighbor_resolved(ip("10.0.0.1"));
        let mut ctx = create_test_ctx(&backend);
        let mut attrs = create_test_attrs(vec![1, 3], 3);
        attrs.mac_dir = MacDirection::SrcMac;
        let mut rule = create_test_rule(&attrs, RuleType::OutboundTerm);

        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Installed);
        assert_eq!(
            backend.acl_rule("ENI:Vnet_1000_AABBCCDDEEFF_OUT_TERM"),
            Some(rule_fields(&[
                ("PRIORITY", "9999"),
                ("DST_IP", "10.2.0.1/32"),
                ("INNER_DST_MAC", "aa:bb:cc:dd:ee:ff"),
                ("TUNNEL_VNI", "1234"),
                ("TUNNEL_TERM", "true"),
                ("REDIRECT_ACTION", "10.0.0.1"),
            ]))
        );
        assert!(ctx.tunnels.is_empty());
    }

    #[test]
    fn test_primary_switch_deletes_then_writes() {
        let backend = create_test_backend();
        backend.set_neighbor_resolved(ip("10.0.0.1"));
        let mut ctx = create_test_ctx(&backend);
        let mut attrs = create_test_attrs(vec![1, 2], 1);
        let mut rule = create_test_rule(&attrs, RuleType::Outbound);
        rule.fire(&attrs, &mut ctx).unwrap();
        backend.clear_journal();

        attrs.primary_id = 2;
        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Installed);

        let key = "ENI:Vnet_1000_AABBCCDDEEFF_OUT".to_string();
        assert_eq!(
            backend.journal(),
            vec![
                BackendOp::DeleteRule(key.clone()),
                BackendOp::CreateTunnelNh("20.0.0.2@mock_tunnel".to_string()),
                BackendOp::SetRule(key.clone()),
            ]
        );
        assert_eq!(
            backend.acl_rule(&key).unwrap()["REDIRECT_ACTION"],
            "20.0.0.2@mock_tunnel"
        );
    }

    #[test]
    fn test_switch_to_unresolved_primary_removes_rule() {
        let backend = create_test_backend();
        let mut ctx = create_test_ctx(&backend);
        let mut attrs = create_test_attrs(vec![1, 2], 2);
        let mut rule = create_test_rule(&attrs, RuleType::Inbound);
        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Installed);
        assert_eq!(ctx.tunnels.ref_count(ip("20.0.0.2"), "mock_tunnel"), 1);

        attrs.primary_id = 1;
        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Pending);
        assert!(backend.acl_rules().is_empty());
        assert!(ctx.tunnels.is_empty());
    }

    #[test]
    fn test_term_rule_ignores_primary() {
        let backend = create_test_backend();
        backend.set_neighbor_resolved(ip("10.0.0.1"));
        let mut ctx = create_test_ctx(&backend);
        let mut attrs = create_test_attrs(vec![1, 2], 1);
        let mut rule = create_test_rule(&attrs, RuleType::InboundTerm);
        rule.fire(&attrs, &mut ctx).unwrap();
        backend.clear_journal();

        attrs.primary_id = 2;
        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Installed);
        assert!(backend.journal().is_empty());
    }

    #[test]
    fn test_invalid_endpoint_fails_pending_rule() {
        let backend = create_test_backend();
        let mut ctx = create_test_ctx(&backend);
        let attrs = create_test_attrs(vec![2, 3], 3);
        let mut rule = create_test_rule(&attrs, RuleType::InboundTerm);

        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Failed);
        assert!(rule.next_hop().is_none());

        // Terminal even once the input looks valid.
        let attrs = create_test_attrs(vec![1, 3], 3);
        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Failed);
    }

    #[test]
    fn test_unknown_primary_fails_pending_rule() {
        let backend = create_test_backend();
        let mut ctx = create_test_ctx(&backend);
        let attrs = create_test_attrs(vec![2, 42], 42);
        let mut rule = create_test_rule(&attrs, RuleType::Outbound);

        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Failed);
        assert!(rule.next_hop().is_none());
        assert!(backend.journal().is_empty());
        assert!(ctx.tunnels.is_empty());
    }

    #[test]
    fn test_cluster_dpu_without_npu_fails_pending_rule() {
        let backend = create_test_backend();
        backend.add_dpu(4, "cluster", "10.0.0.4", "");
        let mut ctx = create_test_ctx(&backend);
        let attrs = create_test_attrs(vec![4], 4);
        let mut rule = create_test_rule(&attrs, RuleType::Inbound);

        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Failed);
        assert!(rule.next_hop().is_none());
        assert!(backend.journal().is_empty());
    }

    #[test]
    fn test_invalid_endpoint_keeps_installed_rule() {
        let backend = create_test_backend();
        let mut ctx = create_test_ctx(&backend);
        let mut attrs = create_test_attrs(vec![2, 3], 3);
        let mut rule = create_test_rule(&attrs, RuleType::Inbound);
        rule.fire(&attrs, &mut ctx).unwrap();

        attrs.primary_id = 42;
        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Installed);
        assert_eq!(backend.acl_rules().len(), 1);
    }

    #[test]
    fn test_write_failure_is_retried() {
        let backend = create_test_backend();
        backend.set_neighbor_resolved(ip("10.0.0.1"));
        backend.set_fail_acl_ops(true);
        let mut ctx = create_test_ctx(&backend);
        let attrs = create_test_attrs(vec![1], 1);
        let mut rule = create_test_rule(&attrs, RuleType::Inbound);

        assert!(matches!(rule.fire(&attrs, &mut ctx), Err(EniFwdError::AclBackend(_))));
        assert_eq!(rule.state(), RuleState::Pending);

        backend.set_fail_acl_ops(false);
        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Installed);
    }

    #[test]
    fn test_missing_vip_is_retried() {
        let backend = Arc::new(ReplayBackend::new());
        backend.add_dpu(2, "cluster", "10.0.0.2", "20.0.0.2");
        backend.add_vnet("Vnet_1000", Some(1234), Some("mock_tunnel"));
        let mut ctx = create_test_ctx(&backend);
        let attrs = create_test_attrs(vec![2], 2);
        let mut rule = create_test_rule(&attrs, RuleType::Inbound);

        let err = rule.fire(&attrs, &mut ctx).unwrap_err();
        assert!(err.is_retryable());

        backend.add_vip("10.2.0.1/32");
        assert_eq!(rule.fire(&attrs, &mut ctx).unwrap(), RuleState::Installed);
        assert_eq!(ctx.tunnels.ref_count(ip("20.0.0.2"), "mock_tunnel"), 1);
    }

    #[test]
    fn test_destroy_releases_pending_next_hop() {
        let backend = create_test_backend();
        backend.clear_vips();
        let mut ctx = create_test_ctx(&backend);
        let attrs = create_test_attrs(vec![2], 2);
        let mut rule = create_test_rule(&attrs, RuleType::Inbound);

        assert!(rule.fire(&attrs, &mut ctx).is_err());
        assert_eq!(rule.state(), RuleState::Pending);
        assert_eq!(ctx.tunnels.ref_count(ip("20.0.0.2"), "mock_tunnel"), 1);

        rule.destroy(&mut ctx).unwrap();
        assert!(ctx.tunnels.is_empty());
        assert!(rule.next_hop().is_none());
    }

    #[test]
    fn test_destroy_failure_is_retryable() {
        let backend = create_test_backend();
        let mut ctx = create_test_ctx(&backend);
        let attrs = create_test_attrs(vec![2], 2);
        let mut rule = create_test_rule(&attrs, RuleType::Inbound);
        rule.fire(&attrs, &mut ctx).unwrap();

        backend.set_fail_acl_ops(true);
        assert!(rule.destroy(&mut ctx).is_err());
        assert_eq!(rule.state(), RuleState::Installed);
        assert_eq!(ctx.tunnels.ref_count(ip("20.0.0.2"), "mock_tunnel"), 1);

        backend.set_fail_acl_ops(false);
        rule.destroy(&mut ctx).unwrap();
        assert_eq!(rule.state(), RuleState::Uninstalled);
        assert!(ctx.tunnels.is_empty());
        assert!(backend.acl_rules().is_empty());
    }
}
