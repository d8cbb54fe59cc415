//! Migration runner for secondary datacenters.
//!
//! Each pass performs the side effect of the current [`MigrationState`],
//! turns its result into a [`MigrationEvent`] and applies [`transition`].
//! When the phase advances the next phase runs immediately; otherwise the
//! pass ends and the retry loop paces the next one. Errors leave the state
//! untouched.

use super::{cleanup, completion_recorded, IntentionFormat, MIGRATION_ROUTINE_NAME};
use crate::cancel::CancellationToken;
use crate::collaborators::Collaborators;
use crate::replicator::{LegacyIntentionReplicator, LegacyPass, ReplicationCursor};
use crate::retry::{retry_loop_backoff, LoopControl};
use std::sync::Arc;
use tokio::sync::watch;
use xdc_core::migration::{transition, MigrationEvent, MigrationState, Transition};
use xdc_core::{ReplicationConfig, ReplicationError};

pub struct SecondaryMigration {
    collaborators: Collaborators,
    format: Arc<IntentionFormat>,
    legacy: LegacyIntentionReplicator,
    /// Cursor of this term's config entry replication loop
    config_cursor: ReplicationCursor,
    config: Arc<ReplicationConfig>,
    state: watch::Sender<MigrationState>,
}

impl SecondaryMigration {
    pub fn new(
        collaborators: Collaborators,
        format: Arc<IntentionFormat>,
        config_cursor: ReplicationCursor,
        config: Arc<ReplicationConfig>,
    ) -> Self {
        let legacy = LegacyIntentionReplicator::new(collaborators.clone(), config.clone());
        let (state, _) = watch::channel(MigrationState::default());
        Self {
            collaborators,
            format,
            legacy,
            config_cursor,
            config,
            state,
        }
    }

    pub fn state(&self) -> MigrationState {
        *self.state.borrow()
    }

    /// Follow the state from outside the runner, e.g. after it was moved
    /// into a leader routine.
    pub fn subscribe(&self) -> watch::Receiver<MigrationState> {
        self.state.subscribe()
    }

    /// Drive the state machine as far as it can go without waiting.
    pub async fn run_pass(
        &self,
        cancel: &CancellationToken,
    ) -> Result<LoopControl, ReplicationError> {
        loop {
            if completion_recorded(self.collaborators.metadata.as_ref())? {
                self.format.mark_converted();
                self.apply(MigrationEvent::CompletionObserved)?;
                return Ok(LoopControl::Done);
            }

            let state = self.state();
            let event = match state {
                MigrationState::ReplicateLegacy {
                    last_fetch_index,
                    legacy_disabled,
                } => {
                    if self.format.supports_config_entries() {
                        MigrationEvent::CompatibilityConfirmed
                    } else if legacy_disabled {
                        // wait for gossip to confirm compatibility
                        return Ok(LoopControl::Continue);
                    } else {
                        let Some(token) = self.collaborators.replication_token() else {
                            return Ok(LoopControl::Continue);
                        };
                        match self
                            .legacy
                            .replicate_legacy_once(cancel, last_fetch_index, &token)
                            .await?
                        {
                            LegacyPass::Cancelled => return Ok(LoopControl::Continue),
                            LegacyPass::OutOfLegacyMode => MigrationEvent::LegacyModeEnded,
                            LegacyPass::Replicated(index) => {
                                MigrationEvent::LegacyReplicated { index }
                            }
                        }
                    }
                }

                MigrationState::WaitForPrimary { last_fetch_index } => {
                    let Some(token) = self.collaborators.replication_token() else {
                        return Ok(LoopControl::Continue);
                    };
                    match self
                        .legacy
                        .legacy_summary(cancel, last_fetch_index, &token)
                        .await?
                    {
                        None => return Ok(LoopControl::Continue),
                        Some((index, remaining)) => {
                            MigrationEvent::PrimaryLegacyCount { index, remaining }
                        }
                    }
                }

                MigrationState::WaitForConfigReplication {
                    primary_zeroed_index,
                } => {
                    let index = self.config_cursor.get();
                    tracing::debug!(
                        last_primary_intention_index = primary_zeroed_index,
                        last_replicated_config_index = index,
                        "intention migration in secondary status"
                    );
                    MigrationEvent::ConfigReplicatedThrough { index }
                }

                MigrationState::DoCleanup => {
                    cleanup(self.collaborators.commit.as_ref(), &self.format, false).await?;
                    MigrationEvent::CleanupCommitted
                }

                MigrationState::Complete => return Ok(LoopControl::Done),
            };

            let step = self.apply(event)?;
            if step.next.is_complete() {
                tracing::info!("intention migration complete");
                return Ok(LoopControl::Done);
            }
            if !step.advanced {
                return Ok(LoopControl::Continue);
            }
            tracing::debug!(phase = %step.next.phase(), "intention migration advanced");
        }
    }

    fn apply(&self, event: MigrationEvent) -> Result<Transition, ReplicationError> {
        let step = transition(self.state(), event)?;
        self.state.send_replace(step.next);
        Ok(step)
    }

    /// Retry [`SecondaryMigration::run_pass`] until migration completes or
    /// `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ReplicationError> {
        let this = &self;
        let token = &cancel;
        retry_loop_backoff(
            &cancel,
            &self.config.migration_backoff,
            self.config.migration_pass_interval,
            move || this.run_pass(token),
            |e: &ReplicationError| {
                tracing::error!(
                    routine = MIGRATION_ROUTINE_NAME,
                    phase = %this.state().phase(),
                    error = %e,
                    "error performing intention migration in secondary datacenter, will retry"
                );
            },
        )
        .await;
        Ok(())
    }
}
