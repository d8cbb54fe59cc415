//! Per-kind replication loops.
//!
//! [`Replicator`] owns the control flow shared by every resource kind:
//!
//! 1. blocking fetch from the primary at the cursor, racing cancellation
//! 2. local snapshot read
//! 3. full resync when the remote index moved backwards
//! 4. diff, then full records for the upserts are prepared
//! 5. deletions before upserts through the [`Reconciler`]
//! 6. cursor and status update on success
//!
//! A [`ReplicationDelegate`] supplies the kind-specific fetches and commits.

pub mod acl;
pub mod config_entries;
pub mod legacy_intentions;

pub use acl::{PolicyReplication, RoleReplication, TokenReplication};
pub use config_entries::ConfigEntryReplication;
pub use legacy_intentions::{LegacyIntentionReplicator, LegacyPass};

use crate::cancel::CancellationToken;
use crate::collaborators::Collaborators;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::status::StatusTracker;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::Instrument;
use xdc_core::records::{Replicable, ResourceKind};
use xdc_core::{
    chunk_by_count, chunk_by_size, diff, CommitRequest, Indexed, QueryOptions, ReplicationConfig,
    ReplicationError, RpcError, StateError,
};

/// Remote index of the last successful pass of one kind.
///
/// Scoped to a leader term; a fresh term starts from zero and does a full
/// sync. Cloning shares the underlying value.
#[derive(Debug, Clone, Default)]
pub struct ReplicationCursor(Arc<AtomicU64>);

impl ReplicationCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, index: u64) {
        self.0.store(index, Ordering::Release);
    }

    /// Force the next pass to do a full sync
    pub fn reset(&self) {
        self.set(0);
    }
}

/// Everything a delegate needs to commit a diff.
pub struct ApplyContext<'a> {
    pub cancel: &'a CancellationToken,
    pub reconciler: &'a Reconciler,
    /// Non-blocking options for follow-up reads of full records
    pub opts: &'a QueryOptions,
    pub config: &'a ReplicationConfig,
}

/// Key type shared by a delegate's local and remote records.
pub type DelegateKey<D> = <<D as ReplicationDelegate>::Local as Replicable>::Key;

/// Kind-specific half of a replication loop.
#[async_trait]
pub trait ReplicationDelegate: Send + Sync + 'static {
    /// Records read from the local replica
    type Local: Replicable;
    /// Records (or stubs) listed by the primary
    type Remote: Replicable<Key = <Self::Local as Replicable>::Key>;
    /// Full records written locally
    type Upsert: Send + 'static;

    fn kind(&self) -> ResourceKind;

    async fn fetch_remote(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<Self::Remote>>, RpcError>;

    fn fetch_local(&self) -> Result<Vec<Self::Local>, StateError>;

    async fn delete_local(
        &self,
        ctx: &ApplyContext<'_>,
        keys: Vec<DelegateKey<Self>>,
    ) -> Result<ReconcileOutcome, ReplicationError>;

    /// Turn the listed records selected for upsert into full records.
    ///
    /// Runs before any deletion is committed, so a pass that cannot write
    /// its upserts leaves local state untouched.
    async fn prepare_upserts(
        &self,
        ctx: &ApplyContext<'_>,
        records: Vec<Self::Remote>,
    ) -> Result<Vec<Self::Upsert>, ReplicationError>;

    async fn upsert_local(
        &self,
        ctx: &ApplyContext<'_>,
        records: Vec<Self::Upsert>,
    ) -> Result<ReconcileOutcome, ReplicationError>;
}

/// Result of one replication pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Local state now matches the primary as of `index`
    Replicated {
        index: u64,
        deletions: usize,
        upserts: usize,
    },
    /// Cancellation was observed; nothing should be recorded
    Cancelled,
}

/// Replication loop for one resource kind.
pub struct Replicator<D> {
    delegate: D,
    cursor: ReplicationCursor,
    reconciler: Reconciler,
    collaborators: Collaborators,
    status: Arc<StatusTracker>,
    config: Arc<ReplicationConfig>,
}

impl<D: ReplicationDelegate> Replicator<D> {
    pub fn new(
        delegate: D,
        cursor: ReplicationCursor,
        collaborators: Collaborators,
        status: Arc<StatusTracker>,
        config: Arc<ReplicationConfig>,
    ) -> Self {
        let reconciler = Reconciler::new(collaborators.commit.clone(), config.apply_interval());
        Self {
            delegate,
            cursor,
            reconciler,
            collaborators,
            status,
            config,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.delegate.kind()
    }

    pub fn cursor(&self) -> &ReplicationCursor {
        &self.cursor
    }

    /// One fetch, diff and apply cycle starting from `last_remote_index`.
    pub async fn replicate_once(
        &self,
        cancel: &CancellationToken,
        last_remote_index: u64,
        token: &str,
    ) -> Result<PassOutcome, ReplicationError> {
        let kind = self.kind();
        let noun = kind.singular_noun();
        let primary = self.config.primary();
        let opts = QueryOptions::blocking(primary, last_remote_index, token);

        let remote = tokio::select! {
            _ = cancel.cancelled() => return Ok(PassOutcome::Cancelled),
            remote = self.delegate.fetch_remote(&opts) => remote,
        }
        .map_err(|e| ReplicationError::fetch(kind.plural_noun(), e))?;
        tracing::debug!(amount = remote.items.len(), "finished fetching remote {kind}");

        // the fetch may have blocked for a long time
        if cancel.is_cancelled() {
            return Ok(PassOutcome::Cancelled);
        }

        let local = self
            .delegate
            .fetch_local()
            .map_err(|e| ReplicationError::local_state(kind.plural_noun(), e))?;

        let mut last_remote_index = last_remote_index;
        if remote.index < last_remote_index {
            tracing::warn!(
                from = last_remote_index,
                to = remote.index,
                "{noun} replication remote index moved backwards, forcing a full sync"
            );
            last_remote_index = 0;
        }

        let result = diff(&local, &remote.items, last_remote_index);
        if result.local_skipped > 0 || result.remote_skipped > 0 {
            tracing::debug!(
                local_skipped = result.local_skipped,
                remote_skipped = result.remote_skipped,
                "{noun} replication skipping records that need upgrading"
            );
        }
        let deletions = result.deletions.len();
        let upserts = result.upserts.len();
        tracing::debug!(deletions, upserts, "{noun} replication diff computed");

        let read_opts = QueryOptions::immediate(primary, token);
        let ctx = ApplyContext {
            cancel,
            reconciler: &self.reconciler,
            opts: &read_opts,
            config: &self.config,
        };

        let prepared = if upserts > 0 {
            self.delegate.prepare_upserts(&ctx, result.upserts).await?
        } else {
            Vec::new()
        };

        if deletions > 0 {
            let outcome = self.delegate.delete_local(&ctx, result.deletions).await?;
            if outcome.is_aborted() {
                return Ok(PassOutcome::Cancelled);
            }
        }

        if !prepared.is_empty() {
            let outcome = self.delegate.upsert_local(&ctx, prepared).await?;
            if outcome.is_aborted() {
                return Ok(PassOutcome::Cancelled);
            }
        }

        Ok(PassOutcome::Replicated {
            index: remote.index,
            deletions,
            upserts,
        })
    }

    /// Replicate until `cancel` fires.
    ///
    /// Passes are paced by `replication_rate`. A pass is skipped while no
    /// replication token is configured. A failed pass resets the cursor and
    /// backs off before the next attempt.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ReplicationError> {
        let kind = self.kind();
        let span = tracing::info_span!("replicator", kind = %kind);
        self.run_loop(cancel).instrument(span).await;
        Ok(())
    }

    async fn run_loop(self, cancel: CancellationToken) {
        let kind = self.kind();
        let noun = kind.singular_noun();
        let mut pacer = interval(self.config.pass_interval());
        pacer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u32 = 0;

        tracing::info!("started {noun} replication");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = pacer.tick() => {}
            }

            let Some(token) = self.collaborators.replication_token() else {
                continue;
            };

            match self.replicate_once(&cancel, self.cursor.get(), &token).await {
                Ok(PassOutcome::Cancelled) => break,
                Ok(PassOutcome::Replicated { index, .. }) => {
                    self.cursor.set(index);
                    self.status.record_success(kind, index);
                    failures = 0;
                    tracing::debug!(index, "{noun} replication completed through remote index");
                }
                Err(e) => {
                    self.cursor.reset();
                    self.status.record_error(kind, e.to_string());
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        error = %e,
                        "{noun} replication error (will retry if still leader)"
                    );
                    let delay = self.config.replication_backoff.delay_for_failures(failures);
                    if !cancel.sleep(delay).await {
                        break;
                    }
                }
            }
        }
        tracing::info!("stopped {noun} replication");
    }
}

// =============================================================================
// Shared apply helpers
// =============================================================================

/// Delete `keys` in fixed-count batches.
pub(crate) async fn delete_in_batches<K, F>(
    ctx: &ApplyContext<'_>,
    kind: ResourceKind,
    keys: Vec<K>,
    to_request: F,
) -> Result<ReconcileOutcome, ReplicationError>
where
    F: FnMut(Vec<K>) -> CommitRequest,
{
    let batches = chunk_by_count(keys, ctx.config.max_delete_batch);
    ctx.reconciler
        .apply_batches(ctx.cancel, batches, to_request)
        .await
        .map_err(|e| ReplicationError::apply(kind.plural_noun(), e))
}

/// Upsert `records` in size-bounded batches.
pub(crate) async fn upsert_in_batches<T, F>(
    ctx: &ApplyContext<'_>,
    kind: ResourceKind,
    records: Vec<T>,
    to_request: F,
) -> Result<ReconcileOutcome, ReplicationError>
where
    T: Replicable,
    F: FnMut(Vec<T>) -> CommitRequest,
{
    let batches = chunk_by_size(records, ctx.config.max_upsert_batch_bytes, |r| {
        r.estimated_size()
    });
    ctx.reconciler
        .apply_batches(ctx.cancel, batches, to_request)
        .await
        .map_err(|e| ReplicationError::apply(kind.plural_noun(), e))
}
