//! Shared, lock-protected replication status.

use chrono::Utc;
use parking_lot::RwLock;
use xdc_core::{ReplicationStatus, ReplicationType, ResourceKind};

fn is_acl(kind: ResourceKind) -> bool {
    matches!(
        kind,
        ResourceKind::AclPolicies | ResourceKind::AclRoles | ResourceKind::AclTokens
    )
}

/// Status record updated by the replication routines and read by operators.
///
/// ACL passes also feed the aggregate fields of [`ReplicationStatus`]; every
/// kind gets its own entry in `kinds`.
#[derive(Debug, Default)]
pub struct StatusTracker {
    inner: RwLock<ReplicationStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current status
    pub fn snapshot(&self) -> ReplicationStatus {
        self.inner.read().clone()
    }

    /// A leader term started replicating from `source_datacenter`
    pub fn mark_running(&self, replication_type: ReplicationType, source_datacenter: &str) {
        let mut status = self.inner.write();
        status.enabled = true;
        status.running = true;
        status.replication_type = replication_type;
        status.source_datacenter = source_datacenter.to_string();
    }

    /// The replication loop of `kind` was started
    pub fn mark_kind_running(&self, kind: ResourceKind) {
        self.inner.write().kinds.entry(kind).or_default().running = true;
    }

    /// The leader term ended
    pub fn mark_stopped(&self) {
        let mut status = self.inner.write();
        status.running = false;
        for entry in status.kinds.values_mut() {
            entry.running = false;
        }
    }

    /// A pass of `kind` completed through `index`
    pub fn record_success(&self, kind: ResourceKind, index: u64) {
        let now = Utc::now();
        let mut status = self.inner.write();
        let entry = status.kinds.entry(kind).or_default();
        entry.index = index;
        entry.last_success = Some(now);

        match kind {
            ResourceKind::AclPolicies => status.replicated_index = index,
            ResourceKind::AclRoles => status.replicated_role_index = index,
            ResourceKind::AclTokens => status.replicated_token_index = index,
            ResourceKind::ConfigEntries | ResourceKind::LegacyIntentions => return,
        }
        status.last_success = Some(now);
    }

    /// A pass of `kind` failed with `message`
    pub fn record_error(&self, kind: ResourceKind, message: impl Into<String>) {
        let now = Utc::now();
        let message = message.into();
        let mut status = self.inner.write();
        let entry = status.kinds.entry(kind).or_default();
        entry.last_error = Some(now);
        entry.last_error_message.clone_from(&message);

        if is_acl(kind) {
            status.last_error = Some(now);
            status.last_error_message = message;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_per_kind_indices() {
        let tracker = StatusTracker::new();
        tracker.mark_running(ReplicationType::Tokens, "dc1");
        tracker.record_success(ResourceKind::AclPolicies, 10);
        tracker.record_success(ResourceKind::AclRoles, 11);
        tracker.record_success(ResourceKind::AclTokens, 12);

        let status = tracker.snapshot();
        assert!(status.running);
        assert_eq!(status.source_datacenter, "dc1");
        assert_eq!(
            (
                status.replicated_index,
                status.replicated_role_index,
                status.replicated_token_index
            ),
            (10, 11, 12)
        );
        assert!(status.last_success.is_some());
        assert_eq!(status.kind(ResourceKind::AclRoles).unwrap().index, 11);
    }

    #[test]
    fn config_entry_errors_are_kept_apart_from_acl_status() {
        let tracker = StatusTracker::new();
        tracker.mark_kind_running(ResourceKind::ConfigEntries);
        tracker.record_error(ResourceKind::ConfigEntries, "boom");

        let status = tracker.snapshot();
        assert!(status.last_error.is_none());
        let entries = status.kind(ResourceKind::ConfigEntries).unwrap();
        assert!(entries.running && entries.is_failing());
        assert_eq!(entries.last_error_message, "boom");

        tracker.record_error(ResourceKind::AclTokens, "redacted");
        let status = tracker.snapshot();
        assert!(status.is_failing());
        assert_eq!(status.last_error_message, "redacted");
    }

    #[test]
    fn stopping_clears_every_running_flag() {
        let tracker = StatusTracker::new();
        tracker.mark_running(ReplicationType::Policies, "dc1");
        tracker.mark_kind_running(ResourceKind::AclPolicies);
        tracker.mark_kind_running(ResourceKind::ConfigEntries);
        tracker.record_success(ResourceKind::ConfigEntries, 4);

        tracker.mark_stopped();

        let status = tracker.snapshot();
        assert!(!status.running);
        assert!(status.kinds.values().all(|k| !k.running));
        assert_eq!(status.kind(ResourceKind::ConfigEntries).unwrap().index, 4);
    }
}
