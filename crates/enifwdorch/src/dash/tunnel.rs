//! Refcounted tunnel next hops shared by all remote redirect targets.
//!
//! A tunnel next hop is keyed by the remote NPU address and the VXLAN tunnel
//! name. The backend object is created when the first user acquires the key
//! and removed when the last user releases it.

use log::{debug, warn};
use sonic_orch_common::{HasRefCount, SyncMap};
use sonic_types::IpAddress;
use std::fmt;

use super::ctx::EniFwdCallbacks;
use super::types::{EniFwdError, Result};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelNhKey {
    pub ip: IpAddress,
    pub tunnel: String,
}

impl TunnelNhKey {
    pub fn new(ip: IpAddress, tunnel: impl Into<String>) -> Self {
        Self {
            ip,
            tunnel: tunnel.into(),
        }
    }
}

impl fmt::Display for TunnelNhKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ip, self.tunnel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelNhEntry {
    /// Backend handle of the tunnel next hop.
    pub oid: u64,
    ref_count: u32,
}

impl TunnelNhEntry {
    fn new(oid: u64) -> Self {
        Self { oid, ref_count: 0 }
    }
}

impl HasRefCount for TunnelNhEntry {
    fn increment_ref(&mut self) -> u32 {
        self.ref_count = self.ref_count.saturating_add(1);
        self.ref_count
    }

    fn decrement_ref(&mut self) -> Option<u32> {
        self.ref_count = self.ref_count.checked_sub(1)?;
        Some(self.ref_count)
    }

    fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

/// Counts of backend tunnel next hop operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelNhStats {
    pub created: u64,
    pub removed: u64,
}

/// Table of live tunnel next hops.
///
/// The refcount of an entry equals the number of remote next hops holding it.
#[derive(Debug, Default)]
pub struct TunnelNhTable {
    entries: SyncMap<TunnelNhKey, TunnelNhEntry>,
    stats: TunnelNhStats,
}

impl TunnelNhTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a reference on `ip@tunnel`, creating the backend object on first use.
    ///
    /// A backend failure leaves the table untouched.
    pub fn acquire(
        &mut self,
        callbacks: &dyn EniFwdCallbacks,
        ip: IpAddress,
        tunnel: &str,
    ) -> Result<u64> {
        let key = TunnelNhKey::new(ip, tunnel);

        if !self.entries.contains_key(&key) {
            let oid = match callbacks.create_tunnel_nexthop(tunnel, &ip) {
                Ok(oid) => oid,
                Err(e) => {
                    let error = EniFwdError::TunnelBackend(format!("create {}: {}", key, e));
                    audit_log!(AuditRecord::new(
                        AuditCategory::ResourceCreate,
                        "DashEniFwdOrch",
                        "create_tunnel_nh"
                    )
                    .with_object_id(key.to_string())
                    .with_object_type("tunnel_next_hop")
                    .with_error(error.to_string()));
                    return Err(error);
                }
            };

            self.stats.created = self.stats.created.saturating_add(1);
            audit_log!(AuditRecord::new(
                AuditCategory::ResourceCreate,
                "DashEniFwdOrch",
                "create_tunnel_nh"
            )
            .with_outcome(AuditOutcome::Success)
            .with_object_id(key.to_string())
            .with_object_type("tunnel_next_hop")
            .with_details(serde_json::json!({ "oid": format!("0x{:x}", oid) })));

            self.entries.insert(key.clone(), TunnelNhEntry::new(oid));
        }

        let entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| EniFwdError::TunnelBackend(format!("lost entry {}", key)))?;
        let refs = entry.increment_ref();
        debug!("Tunnel next hop {} acquired, refcount {}", key, refs);
        Ok(entry.oid)
    }

    /// Drops a reference on `ip@tunnel`, removing the backend object with the last one.
    ///
    /// If the backend refuses the removal the reference is kept so the
    /// release can be retried.
    pub fn release(
        &mut self,
        callbacks: &dyn EniFwdCallbacks,
        ip: IpAddress,
        tunnel: &str,
    ) -> Result<()> {
        let key = TunnelNhKey::new(ip, tunnel);

        let refs = match self.entries.ref_count(&key) {
            Some(refs) => refs,
            None => {
                warn!("Release of unknown tunnel next hop {}", key);
                return Ok(());
            }
        };

        if refs > 1 {
            let left = self
                .entries
                .decrement_ref(&key)
                .map_err(|e| EniFwdError::TunnelBackend(format!("{}: {}", key, e)))?;
            debug!("Tunnel next hop {} released, refcount {}", key, left);
            return Ok(());
        }

        if let Err(e) = callbacks.remove_tunnel_nexthop(tunnel, &ip) {
            let error = EniFwdError::TunnelBackend(format!("remove {}: {}", key, e));
            audit_log!(AuditRecord::new(
                AuditCategory::ResourceDelete,
                "DashEniFwdOrch",
                "remove_tunnel_nh"
            )
            .with_object_id(key.to_string())
            .with_object_type("tunnel_next_hop")
            .with_error(error.to_string()));
            return Err(error);
        }

        self.entries.remove(&key);
        self.stats.removed = self.stats.removed.saturating_add(1);
        audit_log!(AuditRecord::new(
            AuditCategory::ResourceDelete,
            "DashEniFwdOrch",
            "remove_tunnel_nh"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(key.to_string())
        .with_object_type("tunnel_next_hop"));
        Ok(())
    }

    /// Current refcount, 0 when the key has no entry.
    pub fn ref_count(&self, ip: IpAddress, tunnel: &str) -> u32 {
        self.entries
            .ref_count(&TunnelNhKey::new(ip, tunnel))
            .unwrap_or(0)
    }

    pub fn get(&self, ip: IpAddress, tunnel: &str) -> Option<&TunnelNhEntry> {
        self.entries.get(&TunnelNhKey::new(ip, tunnel))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> TunnelNhStats {
        self.stats
    }
}
