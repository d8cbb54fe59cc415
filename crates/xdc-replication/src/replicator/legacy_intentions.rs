//! Legacy intention replication, embedded in the secondary migration.
//!
//! Unlike the other kinds this is not a standalone loop: the secondary
//! migration drives one pass at a time while the datacenter is still in
//! legacy mode. Changes are committed as transactions of deletes followed by
//! upserts, each transaction bounded by `max_intention_txn_bytes`.

use crate::cancel::CancellationToken;
use crate::collaborators::Collaborators;
use crate::reconciler::Reconciler;
use std::sync::Arc;
use xdc_core::records::{DataOrigin, Intention, ResourceKind};
use xdc_core::{
    chunk_by_size, diff, CommitRequest, IntentionOp, QueryOptions, ReplicationConfig,
    ReplicationError,
};

const KIND: ResourceKind = ResourceKind::LegacyIntentions;

/// Result of one legacy replication pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyPass {
    /// The local legacy table matches the primary as of `index`
    Replicated(u64),
    /// The primary (or local state) already uses config entries; legacy
    /// replication must stop
    OutOfLegacyMode,
    Cancelled,
}

pub struct LegacyIntentionReplicator {
    collaborators: Collaborators,
    reconciler: Reconciler,
    config: Arc<ReplicationConfig>,
}

impl LegacyIntentionReplicator {
    pub fn new(collaborators: Collaborators, config: Arc<ReplicationConfig>) -> Self {
        let reconciler = Reconciler::new(collaborators.commit.clone(), config.apply_interval());
        Self {
            collaborators,
            reconciler,
            config,
        }
    }

    /// Mirror the primary's intentions into the local legacy table once.
    pub async fn replicate_legacy_once(
        &self,
        cancel: &CancellationToken,
        last_fetch_index: u64,
        token: &str,
    ) -> Result<LegacyPass, ReplicationError> {
        let opts = QueryOptions::blocking(self.config.primary(), last_fetch_index, token);
        let remote = tokio::select! {
            _ = cancel.cancelled() => return Ok(LegacyPass::Cancelled),
            remote = self.collaborators.primary.list_intentions(&opts) => remote,
        }
        .map_err(|e| ReplicationError::fetch(KIND.plural_noun(), e))?;

        if cancel.is_cancelled() {
            return Ok(LegacyPass::Cancelled);
        }

        if remote.data_origin == Some(DataOrigin::ConfigEntries) {
            return Ok(LegacyPass::OutOfLegacyMode);
        }

        let local = self
            .collaborators
            .local
            .legacy_intentions()
            .map_err(|e| ReplicationError::local_state(KIND.plural_noun(), e))?;

        // permissions only exist on config entry intentions
        if local.iter().any(|ixn| !ixn.permissions.is_empty()) {
            return Ok(LegacyPass::OutOfLegacyMode);
        }

        let result = diff(&local, &remote.intentions, 0);
        tracing::debug!(
            deletions = result.deletions.len(),
            upserts = result.upserts.len(),
            "legacy intention replication diff computed"
        );

        let txns = txn_batches(
            result.deletions,
            result.upserts,
            self.config.max_intention_txn_bytes,
        );
        let outcome = self
            .reconciler
            .apply_batches(cancel, txns, CommitRequest::IntentionTxn)
            .await
            .map_err(|e| ReplicationError::apply(KIND.plural_noun(), e))?;
        if outcome.is_aborted() {
            return Ok(LegacyPass::Cancelled);
        }

        Ok(LegacyPass::Replicated(remote.index))
    }

    /// Index and row count of the primary's legacy-only table, blocking on
    /// `last_fetch_index`. `None` when cancelled.
    pub async fn legacy_summary(
        &self,
        cancel: &CancellationToken,
        last_fetch_index: u64,
        token: &str,
    ) -> Result<Option<(u64, usize)>, ReplicationError> {
        let opts = QueryOptions::blocking(self.config.primary(), last_fetch_index, token);
        let remote = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            remote = self.collaborators.primary.list_legacy_intentions(&opts) => remote,
        }
        .map_err(|e| ReplicationError::fetch(KIND.plural_noun(), e))?;
        Ok(Some((remote.index, remote.items.len())))
    }
}

/// Deletes first, then upserts, split into size-bounded transactions.
fn txn_batches(
    deletions: Vec<String>,
    upserts: Vec<Intention>,
    max_txn_bytes: usize,
) -> Vec<Vec<IntentionOp>> {
    let ops: Vec<IntentionOp> = deletions
        .into_iter()
        .map(IntentionOp::Delete)
        .chain(upserts.into_iter().map(IntentionOp::Upsert))
        .collect();
    chunk_by_size(ops, max_txn_bytes, IntentionOp::estimated_size)
}
