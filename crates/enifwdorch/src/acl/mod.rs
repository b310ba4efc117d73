//! ACL vocabulary used to publish ENI redirect rules.
//!
//! The orch never talks to the ACL hardware directly. It writes table type,
//! table and rule entries as field-value lists that the ACL backend turns
//! into hardware objects, so this module only defines the names and the
//! table/table-type shapes.

mod table;
mod table_type;
mod types;

pub use table::AclTable;
pub use table_type::{create_eni_redirect_table_type, AclTableType, AclTableTypeBuilder};
pub use types::{
    AclActionType, AclBindPointType, AclMatchField, AclStage, ACL_TABLE_DESCRIPTION,
    ACL_TABLE_PORTS, ACL_TABLE_STAGE, ACL_TABLE_TYPE, ACL_TABLE_TYPE_ACTIONS,
    ACL_TABLE_TYPE_BIND_POINTS, ACL_TABLE_TYPE_MATCHES, RULE_PRIORITY,
};
