//! Leadership lifecycle of the replication engine.
//!
//! Everything a leader runs belongs to a [`LeaderTerm`]: the root
//! cancellation scope and the per-kind replication cursors. A term is created
//! fresh when leadership is established and torn down (all routines stopped
//! and awaited) when it is revoked, so nothing from a stale term can commit
//! after the next one starts.
//!
//! Leadership notifications must be delivered one at a time; establishing
//! and revoking are not meant to race each other.

use crate::cancel::{CancellationSource, CancellationToken};
use crate::collaborators::Collaborators;
use crate::migration::{
    cleanup, completion_recorded, IntentionFormat, PrimaryMigration, SecondaryMigration,
    MIGRATION_ROUTINE_NAME,
};
use crate::replicator::{
    ConfigEntryReplication, PolicyReplication, ReplicationCursor, ReplicationDelegate, Replicator,
    RoleReplication, TokenReplication,
};
use crate::routine::RoutineManager;
use crate::status::StatusTracker;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use xdc_core::{
    ConfigError, MigrationPhase, MigrationState, ReplicationConfig, ReplicationError,
    ReplicationStatus, ReplicationType,
};

/// Replication cursors of one leader term.
#[derive(Debug, Clone, Default)]
pub struct TermCursors {
    pub policies: ReplicationCursor,
    pub roles: ReplicationCursor,
    pub tokens: ReplicationCursor,
    pub config_entries: ReplicationCursor,
}

/// State owned by the current leadership term.
#[derive(Debug)]
pub struct LeaderTerm {
    cancel: CancellationSource,
    cursors: TermCursors,
    /// State of the secondary migration runner, when one was started
    migration: Option<watch::Receiver<MigrationState>>,
}

impl LeaderTerm {
    fn new() -> Self {
        Self {
            cancel: CancellationSource::new(),
            cursors: TermCursors::default(),
            migration: None,
        }
    }
}

/// Entry point driven by leadership notifications.
pub struct ReplicationEngine {
    config: Arc<ReplicationConfig>,
    collaborators: Collaborators,
    routines: RoutineManager,
    status: Arc<StatusTracker>,
    format: Arc<IntentionFormat>,
    term: Mutex<Option<LeaderTerm>>,
}

impl ReplicationEngine {
    pub fn new(
        config: ReplicationConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let format = Arc::new(IntentionFormat::new(collaborators.features.clone()));
        Ok(Self {
            config: Arc::new(config),
            collaborators,
            routines: RoutineManager::new(),
            status: Arc::new(StatusTracker::new()),
            format,
            term: Mutex::new(None),
        })
    }

    /// This node became leader: start every routine its role requires.
    ///
    /// Any previous term is revoked first. An error leaves the routines that
    /// did start running; callers are expected to revoke and retry.
    pub async fn establish_leadership(&self) -> Result<(), ReplicationError> {
        self.revoke_leadership().await;

        let term = LeaderTerm::new();
        let token = term.cancel.token();
        let cursors = term.cursors.clone();
        *self.term.lock() = Some(term);

        tracing::info!(
            datacenter = %self.config.datacenter,
            primary = %self.config.primary(),
            "establishing replication leadership"
        );

        if !self.config.is_primary() {
            self.start_acl_replication(&token, &cursors);
            self.start_replicator(
                &token,
                ConfigEntryReplication::new(self.collaborators.clone()),
                cursors.config_entries.clone(),
            );
        }

        if self.config.connect_enabled {
            self.start_intention_migration(&token, &cursors).await?;
        }
        Ok(())
    }

    /// This node lost leadership: stop everything and wait for it to exit.
    pub async fn revoke_leadership(&self) {
        let term = self.term.lock().take();
        let Some(term) = term else {
            return;
        };

        term.cancel.cancel();
        self.routines.stop_all().await;
        self.status.mark_stopped();
        tracing::info!("revoked replication leadership");
    }

    fn start_acl_replication(&self, token: &CancellationToken, cursors: &TermCursors) {
        let replication_type = if self.config.acl_token_replication {
            ReplicationType::Tokens
        } else {
            ReplicationType::Policies
        };
        self.status.mark_running(replication_type, self.config.primary());

        self.start_replicator(
            token,
            PolicyReplication::new(self.collaborators.clone()),
            cursors.policies.clone(),
        );
        self.start_replicator(
            token,
            RoleReplication::new(self.collaborators.clone()),
            cursors.roles.clone(),
        );
        if self.config.acl_token_replication {
            self.start_replicator(
                token,
                TokenReplication::new(self.collaborators.clone()),
                cursors.tokens.clone(),
            );
        }
    }

    fn start_replicator<D: ReplicationDelegate>(
        &self,
        token: &CancellationToken,
        delegate: D,
        cursor: ReplicationCursor,
    ) {
        let kind = delegate.kind();
        let name = kind.routine_name();
        let replicator = Replicator::new(
            delegate,
            cursor,
            self.collaborators.clone(),
            self.status.clone(),
            self.config.clone(),
        );
        self.status.mark_kind_running(kind);
        self.routines.start(token, name, move |cancel| replicator.run(cancel));
    }

    async fn start_intention_migration(
        &self,
        token: &CancellationToken,
        cursors: &TermCursors,
    ) -> Result<(), ReplicationError> {
        // the metadata flag is authoritative in both primary and secondaries
        if completion_recorded(self.collaborators.metadata.as_ref())? {
            self.format.mark_converted();
            return Ok(());
        }

        if self.config.is_primary() {
            if self.format.supports_config_entries() {
                let legacy = self
                    .collaborators
                    .local
                    .legacy_intentions()
                    .map_err(|e| ReplicationError::local_state("intentions", e))?;
                if legacy.is_empty() {
                    return cleanup(self.collaborators.commit.as_ref(), &self.format, true).await;
                }
            }

            let migration = PrimaryMigration::new(
                self.collaborators.clone(),
                self.format.clone(),
                self.config.clone(),
            );
            self.routines
                .start(token, MIGRATION_ROUTINE_NAME, move |cancel| migration.run(cancel));
        } else {
            let migration = SecondaryMigration::new(
                self.collaborators.clone(),
                self.format.clone(),
                cursors.config_entries.clone(),
                self.config.clone(),
            );
            if let Some(term) = self.term.lock().as_mut() {
                term.migration = Some(migration.subscribe());
            }
            self.routines
                .start(token, MIGRATION_ROUTINE_NAME, move |cancel| migration.run(cancel));
        }
        Ok(())
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Snapshot of replication status, ACL aggregate and per kind
    pub fn status(&self) -> ReplicationStatus {
        self.status.snapshot()
    }

    pub fn is_leader(&self) -> bool {
        self.term.lock().is_some()
    }

    /// Intentions are served from config entries in this datacenter
    pub fn migration_complete(&self) -> bool {
        self.format.is_converted()
    }

    /// Phase of legacy intention migration in this datacenter.
    ///
    /// `None` while no state machine tracks it: outside a leader term, or on
    /// a primary that has not finished converting.
    pub fn migration_phase(&self) -> Option<MigrationPhase> {
        if self.format.is_converted() {
            return Some(MigrationPhase::Complete);
        }
        let term = self.term.lock();
        let migration = term.as_ref()?.migration.as_ref()?;
        let phase = migration.borrow().phase();
        Some(phase)
    }

    pub fn is_routine_running(&self, name: &str) -> bool {
        self.routines.is_running(name)
    }

    /// Names of the routines currently running, sorted
    pub fn running_routines(&self) -> Vec<String> {
        self.routines.running()
    }

    /// Config entry replication cursor of the current term
    pub fn config_entry_index(&self) -> Option<u64> {
        self.term
            .lock()
            .as_ref()
            .map(|term| term.cursors.config_entries.get())
    }
}

impl std::fmt::Debug for ReplicationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationEngine")
            .field("datacenter", &self.config.datacenter)
            .field("routines", &self.routines)
            .finish_non_exhaustive()
    }
}
