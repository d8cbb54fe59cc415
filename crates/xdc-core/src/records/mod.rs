//! Replicated resource records and the capability set the diff engine needs.
//!
//! Every resource kind (policies, roles, tokens, config entries, legacy
//! intentions) goes through the same diff and reconcile pipeline. The
//! per-kind differences are expressed through [`Replicable`]:
//!
//! - `key()` orders records; the engine sorts by it before merging
//! - `content_hash()` detects real changes
//! - `modify_index()` is compared against the replication cursor
//! - `estimated_size()` bounds consensus-log batches
//! - `is_placeholder()` skips tokens that have no accessor yet
//! - `COMPARISON` selects whether the cursor participates at all

pub mod acl;
pub mod config_entry;
pub mod intention;

pub use acl::{AclPolicy, AclPolicyStub, AclRole, AclRoleStub, AclToken, AclTokenStub};
pub use config_entry::{ConfigEntry, ConfigEntryKey, ConfigEntryKind, EnterpriseScope};
pub use intention::{
    migrate_intentions, DataOrigin, Intention, IntentionAction, IntentionPermission,
    IntentionSource, ServiceIntentionsEntry,
};

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// How a record present on both sides is judged stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Upsert when the remote copy is newer than the cursor and its hash differs
    IndexAndHash,
    /// Upsert whenever the hashes differ
    HashOnly,
}

/// Capability set a record (or stub) exposes to the diff engine.
pub trait Replicable: Clone + Send + Sync + 'static {
    /// Identity of the record; its `Ord` is the diff order
    type Key: Ord + Clone + Debug + Send + Sync + 'static;

    /// Staleness rule for records present on both sides
    const COMPARISON: Comparison = Comparison::IndexAndHash;

    /// Identity of this record
    fn key(&self) -> Self::Key;

    /// Opaque content hash
    fn content_hash(&self) -> &[u8];

    /// Last index this record was modified at
    fn modify_index(&self) -> u64;

    /// Approximate encoded size in bytes
    fn estimated_size(&self) -> usize;

    /// Record has no usable identity yet and must be left alone
    fn is_placeholder(&self) -> bool {
        false
    }
}

/// The resource families replicated from the primary datacenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// ACL policies
    AclPolicies,
    /// ACL roles
    AclRoles,
    /// ACL tokens
    AclTokens,
    /// Centralized configuration entries
    ConfigEntries,
    /// Intentions stored in the legacy table
    LegacyIntentions,
}

impl ResourceKind {
    /// Singular noun used in logs and errors
    pub fn singular_noun(self) -> &'static str {
        match self {
            ResourceKind::AclPolicies => "policy",
            ResourceKind::AclRoles => "role",
            ResourceKind::AclTokens => "token",
            ResourceKind::ConfigEntries => "config entry",
            ResourceKind::LegacyIntentions => "intention",
        }
    }

    /// Plural noun used in logs and errors
    pub fn plural_noun(self) -> &'static str {
        match self {
            ResourceKind::AclPolicies => "policies",
            ResourceKind::AclRoles => "roles",
            ResourceKind::AclTokens => "tokens",
            ResourceKind::ConfigEntries => "config entries",
            ResourceKind::LegacyIntentions => "intentions",
        }
    }

    /// Leader routine name for this kind's replication loop
    pub fn routine_name(self) -> &'static str {
        match self {
            ResourceKind::AclPolicies => "ACL policy replication",
            ResourceKind::AclRoles => "ACL role replication",
            ResourceKind::AclTokens => "ACL token replication",
            ResourceKind::ConfigEntries => "config entry replication",
            ResourceKind::LegacyIntentions => "legacy intention replication",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.plural_noun())
    }
}

/// Content hash helper shared by the record kinds that hash JSON bodies.
pub fn hash_json(value: &serde_json::Value) -> Vec<u8> {
    let encoded = value.to_string();
    blake3::hash(encoded.as_bytes()).as_bytes().to_vec()
}
