//! Audit logging for ENI forwarding state changes.
//!
//! Every change the orch pushes to a backend (ACL rules, the ACL table,
//! tunnel next hops) is recorded as a structured [`AuditRecord`] and emitted
//! through `tracing` under the `audit` target by [`audit_log!`]. Records
//! serialize to JSON so they can be shipped as-is to a log collector.
//!
//! | Outcome | Level |
//! |---------|-------|
//! | Success | info |
//! | InProgress | debug |
//! | Failure | warn |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of an audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Backend object created (ACL rule, tunnel next hop, ACL table)
    ResourceCreate,
    /// Backend object replaced or re-targeted
    ResourceModify,
    /// Backend object removed
    ResourceDelete,
    /// Orch initialization and shutdown
    SystemLifecycle,
    /// Failures that are not tied to a single object
    ErrorCondition,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::ResourceCreate => write!(f, "RESOURCE_CREATE"),
            AuditCategory::ResourceModify => write!(f, "RESOURCE_MODIFY"),
            AuditCategory::ResourceDelete => write!(f, "RESOURCE_DELETE"),
            AuditCategory::SystemLifecycle => write!(f, "SYSTEM_LIFECYCLE"),
            AuditCategory::ErrorCondition => write!(f, "ERROR_CONDITION"),
        }
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
        }
    }
}

/// One structured audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// UTC time the record was created
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    /// Emitting component, e.g. "DashEniFwdOrch"
    pub source: String,
    /// Operation name, e.g. "install_rule"
    pub action: String,
    pub outcome: AuditOutcome,
    /// Identifier of the affected object (rule key, tunnel key, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// Kind of the affected object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Creates a record stamped with the current time.
    ///
    /// The outcome starts as `InProgress` until set explicitly.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attaches an error message and marks the record as a failure.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits `record` under the `audit` target at a level matching its outcome.
pub fn emit(record: &AuditRecord) {
    let object = record.object_id.as_deref().unwrap_or("-");
    let json = record.to_json();
    match record.outcome {
        AuditOutcome::Success => tracing::info!(
            target: "audit",
            category = %record.category,
            action = %record.action,
            audit_json = %json,
            "AUDIT: {} {} {}",
            record.category,
            record.action,
            object
        ),
        AuditOutcome::InProgress => tracing::debug!(
            target: "audit",
            category = %record.category,
            action = %record.action,
            audit_json = %json,
            "AUDIT: {} {} {} started",
            record.category,
            record.action,
            object
        ),
        AuditOutcome::Failure => tracing::warn!(
            target: "audit",
            category = %record.category,
            action = %record.action,
            error = record.error.as_deref().unwrap_or(""),
            audit_json = %json,
            "AUDIT: {} {} {} failed",
            record.category,
            record.action,
            object
        ),
    }
}

/// Emits an [`AuditRecord`](crate::audit::AuditRecord) through [`emit`](crate::audit::emit).
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        $crate::audit::emit(&$record)
    };
}

/// Installs a JSON `tracing` subscriber.
///
/// `RUST_LOG` overrides `log_level` when set. Records emitted through the
/// `log` facade are bridged into the same subscriber.
pub fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .json(),
        )
        .init();
}

/// Installs a human readable `tracing` subscriber for interactive use.
pub fn init_logging_pretty(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .init();
}
