//! Requests the replication engine submits to the local consensus log.

use crate::records::{AclPolicy, AclRole, AclToken, ConfigEntry, Intention};
use serde::{Deserialize, Serialize};

/// Operation applied to a single config entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigEntryOp {
    Upsert,
    Delete,
}

/// One step of a legacy intention transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentionOp {
    /// Write the intention as-is
    Upsert(Intention),
    /// Remove the intention with this ID
    Delete(String),
}

impl IntentionOp {
    /// Approximate encoded size used for transaction batching
    pub fn estimated_size(&self) -> usize {
        use crate::records::Replicable;
        match self {
            IntentionOp::Upsert(ixn) => ixn.estimated_size(),
            IntentionOp::Delete(id) => 16 + id.len(),
        }
    }
}

/// A write routed through the consensus log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommitRequest {
    AclPolicySet(Vec<AclPolicy>),
    AclPolicyDelete(Vec<String>),
    AclRoleSet(Vec<AclRole>),
    AclRoleDelete(Vec<String>),
    AclTokenSet(Vec<AclToken>),
    AclTokenDelete(Vec<String>),
    ConfigEntry {
        op: ConfigEntryOp,
        entry: ConfigEntry,
    },
    /// Atomic batch of legacy intention writes
    IntentionTxn(Vec<IntentionOp>),
    /// Drop every row of the legacy intentions table
    IntentionDeleteAll,
    SystemMetadataSet {
        key: String,
        value: String,
    },
}

impl CommitRequest {
    /// Name used in logs and commit errors
    pub fn request_type(&self) -> &'static str {
        match self {
            CommitRequest::AclPolicySet(_) => "ACLPolicySet",
            CommitRequest::AclPolicyDelete(_) => "ACLPolicyDelete",
            CommitRequest::AclRoleSet(_) => "ACLRoleSet",
            CommitRequest::AclRoleDelete(_) => "ACLRoleDelete",
            CommitRequest::AclTokenSet(_) => "ACLTokenSet",
            CommitRequest::AclTokenDelete(_) => "ACLTokenDelete",
            CommitRequest::ConfigEntry { .. } => "ConfigEntry",
            CommitRequest::IntentionTxn(_) => "Txn",
            CommitRequest::IntentionDeleteAll => "IntentionDeleteAll",
            CommitRequest::SystemMetadataSet { .. } => "SystemMetadataSet",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::IntentionAction;

    #[test]
    fn request_types_are_stable() {
        assert_eq!(CommitRequest::IntentionDeleteAll.request_type(), "IntentionDeleteAll");
        assert_eq!(
            CommitRequest::AclTokenDelete(vec!["a".into()]).request_type(),
            "ACLTokenDelete"
        );
    }

    #[test]
    fn delete_ops_are_cheaper_than_upserts() {
        let ixn = Intention::new("id", "api", "web", IntentionAction::Allow);
        let upsert = IntentionOp::Upsert(ixn);
        let delete = IntentionOp::Delete("id".into());
        assert!(delete.estimated_size() < upsert.estimated_size());
    }
}
