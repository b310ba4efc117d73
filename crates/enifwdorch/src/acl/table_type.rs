//! ACL table type definitions and builder.
//!
//! A table type declares what match fields and actions a table supports and
//! what it can be bound to. Field order is kept as declared because the
//! backend receives it as a comma separated list.

use std::fmt;

use super::types::{
    AclActionType, AclBindPointType, AclMatchField, ACL_TABLE_TYPE_ACTIONS,
    ACL_TABLE_TYPE_BIND_POINTS, ACL_TABLE_TYPE_MATCHES,
};
use sonic_orch_common::FieldValue;

/// ACL table type definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclTableType {
    /// Type name (e.g. "ENI_REDIRECT").
    pub name: String,
    pub matches: Vec<AclMatchField>,
    pub actions: Vec<AclActionType>,
    pub bind_points: Vec<AclBindPointType>,
}

impl AclTableType {
    pub fn supports_match(&self, field: AclMatchField) -> bool {
        self.matches.contains(&field)
    }

    pub fn supports_action(&self, action: AclActionType) -> bool {
        self.actions.contains(&action)
    }

    /// Field-values of the ACL_TABLE_TYPE entry.
    pub fn to_field_values(&self) -> Vec<FieldValue> {
        vec![
            (ACL_TABLE_TYPE_MATCHES.to_string(), join(&self.matches)),
            (ACL_TABLE_TYPE_ACTIONS.to_string(), join(&self.actions)),
            (ACL_TABLE_TYPE_BIND_POINTS.to_string(), join(&self.bind_points)),
        ]
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Display for AclTableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AclTableType({}, matches={}, actions={}, bind_points={})",
            self.name,
            self.matches.len(),
            self.actions.len(),
            self.bind_points.len()
        )
    }
}

/// Fluent builder for [`AclTableType`].
#[derive(Debug, Clone, Default)]
pub struct AclTableTypeBuilder {
    name: Option<String>,
    matches: Vec<AclMatchField>,
    actions: Vec<AclActionType>,
    bind_points: Vec<AclBindPointType>,
}

impl AclTableTypeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds match fields, ignoring ones already present.
    pub fn with_matches(mut self, fields: impl IntoIterator<Item = AclMatchField>) -> Self {
        for field in fields {
            if !self.matches.contains(&field) {
                self.matches.push(field);
            }
        }
        self
    }

    pub fn with_action(mut self, action: AclActionType) -> Self {
        if !self.actions.contains(&action) {
            self.actions.push(action);
        }
        self
    }

    pub fn with_bind_points(mut self, bps: impl IntoIterator<Item = AclBindPointType>) -> Self {
        for bp in bps {
            if !self.bind_points.contains(&bp) {
                self.bind_points.push(bp);
            }
        }
        self
    }

    pub fn build(self) -> Result<AclTableType, String> {
        let name = self.name.ok_or("Table type name is required")?;

        if self.bind_points.is_empty() {
            return Err("At least one bind point is required".to_string());
        }

        if self.matches.is_empty() && self.actions.is_empty() {
            return Err("At least one match or action is required".to_string());
        }

        Ok(AclTableType {
            name,
            matches: self.matches,
            actions: self.actions,
            bind_points: self.bind_points,
        })
    }
}

/// The table type carrying ENI redirect rules.
pub fn create_eni_redirect_table_type(name: &str) -> AclTableType {
    AclTableType {
        name: name.to_string(),
        matches: vec![
            AclMatchField::TunnelVni,
            AclMatchField::DstIp,
            AclMatchField::InnerSrcMac,
            AclMatchField::InnerDstMac,
            AclMatchField::TunnelTerm,
        ],
        actions: vec![AclActionType::RedirectAction],
        bind_points: vec![AclBindPointType::Port, AclBindPointType::PortChannel],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_eni_redirect_fields() {
        let table_type = create_eni_redirect_table_type("ENI_REDIRECT");
        assert!(table_type.supports_match(AclMatchField::TunnelTerm));
        assert!(table_type.supports_action(AclActionType::RedirectAction));

        assert_eq!(
            table_type.to_field_values(),
            vec![
                (
                    "MATCHES".to_string(),
                    "TUNNEL_VNI,DST_IP,INNER_SRC_MAC,INNER_DST_MAC,TUNNEL_TERM".to_string()
                ),
                ("ACTIONS".to_string(), "REDIRECT_ACTION".to_string()),
                ("BIND_POINTS".to_string(), "PORT,PORTCHANNEL".to_string()),
            ]
        );
    }

    #[test]
    fn test_builder_matches_fixed_type() {
        let built = AclTableTypeBuilder::new()
            .with_name("ENI_REDIRECT")
            .with_matches([
                AclMatchField::TunnelVni,
                AclMatchField::DstIp,
                AclMatchField::InnerSrcMac,
                AclMatchField::InnerDstMac,
                AclMatchField::TunnelTerm,
                AclMatchField::DstIp,
            ])
            .with_action(AclActionType::RedirectAction)
            .with_bind_points([AclBindPointType::Port, AclBindPointType::PortChannel])
            .build()
            .unwrap();

        assert_eq!(built, create_eni_redirect_table_type("ENI_REDIRECT"));
    }

    #[test]
    fn test_builder_validation() {
        assert!(AclTableTypeBuilder::new().build().is_err());
        assert!(AclTableTypeBuilder::new()
            .with_name("EMPTY")
            .with_bind_points([AclBindPointType::Port])
            .build()
            .is_err());
        assert!(AclTableTypeBuilder::new()
            .with_name("NO_BIND")
            .with_action(AclActionType::RedirectAction)
            .build()
            .is_err());
    }
}
