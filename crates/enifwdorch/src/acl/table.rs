//! ACL table definition.

use std::collections::BTreeSet;

use super::types::{
    AclStage, ACL_TABLE_DESCRIPTION, ACL_TABLE_PORTS, ACL_TABLE_STAGE, ACL_TABLE_TYPE,
};
use sonic_orch_common::FieldValue;

/// An ACL table bound to a set of ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclTable {
    pub name: String,
    pub description: String,
    /// Name of the table type this table is created from.
    pub type_name: String,
    pub stage: AclStage,
    /// Port and PortChannel names, kept sorted.
    pub ports: BTreeSet<String>,
}

impl AclTable {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            type_name: type_name.into(),
            stage: AclStage::Ingress,
            ports: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_ports(mut self, ports: impl IntoIterator<Item = String>) -> Self {
        self.ports.extend(ports);
        self
    }

    /// Field-values of the ACL_TABLE entry.
    pub fn to_field_values(&self) -> Vec<FieldValue> {
        vec![
            (ACL_TABLE_DESCRIPTION.to_string(), self.description.clone()),
            (ACL_TABLE_TYPE.to_string(), self.type_name.clone()),
            (ACL_TABLE_STAGE.to_string(), self.stage.to_string()),
            (
                ACL_TABLE_PORTS.to_string(),
                self.ports.iter().cloned().collect::<Vec<_>>().join(","),
            ),
        ]
    }
}
