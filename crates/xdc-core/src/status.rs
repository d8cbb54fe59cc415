//! Observable replication status.

use crate::records::ResourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn failing(last_error: Option<DateTime<Utc>>, last_success: Option<DateTime<Utc>>) -> bool {
    match (last_error, last_success) {
        (Some(err), Some(ok)) => err > ok,
        (Some(_), None) => true,
        _ => false,
    }
}

/// What the ACL replicator is currently replicating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationType {
    /// Replication has not started
    #[default]
    None,
    /// Policies and roles only
    Policies,
    /// Policies, roles and global tokens
    Tokens,
}

/// Point-in-time view of ACL replication, as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplicationStatus {
    /// This datacenter replicates from a primary
    pub enabled: bool,
    /// A leader term currently runs the replication routines
    pub running: bool,
    pub replication_type: ReplicationType,
    pub source_datacenter: String,
    /// Remote index of the last successful policy pass
    pub replicated_index: u64,
    /// Remote index of the last successful role pass
    pub replicated_role_index: u64,
    /// Remote index of the last successful token pass
    pub replicated_token_index: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
    pub last_error_message: String,
    /// Progress of every replication loop started so far, by kind
    pub kinds: BTreeMap<ResourceKind, KindStatus>,
}

impl ReplicationStatus {
    /// Last ACL pass of any kind failed more recently than one succeeded
    pub fn is_failing(&self) -> bool {
        failing(self.last_error, self.last_success)
    }

    pub fn kind(&self, kind: ResourceKind) -> Option<&KindStatus> {
        self.kinds.get(&kind)
    }
}

/// Progress of a single kind's replication loop.
///
/// Comparing `index` with the primary's current index gives the lag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KindStatus {
    pub running: bool,
    /// Remote index of the last successful pass
    pub index: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
    pub last_error_message: String,
}

impl KindStatus {
    pub fn is_failing(&self) -> bool {
        failing(self.last_error, self.last_success)
    }
}
