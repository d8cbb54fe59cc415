//! Migration runner for the primary datacenter.

use super::{cleanup, convert_legacy_intentions, IntentionFormat, MIGRATION_ROUTINE_NAME};
use crate::cancel::CancellationToken;
use crate::collaborators::Collaborators;
use crate::reconciler::Reconciler;
use crate::retry::{retry_loop_backoff, LoopControl};
use std::sync::Arc;
use xdc_core::records::{ConfigEntry, ResourceKind};
use xdc_core::{CommitRequest, ConfigEntryOp, ReplicationConfig, ReplicationError};

/// Converts the primary's legacy intentions once every server is compatible.
pub struct PrimaryMigration {
    collaborators: Collaborators,
    format: Arc<IntentionFormat>,
    reconciler: Reconciler,
    config: Arc<ReplicationConfig>,
}

impl PrimaryMigration {
    pub fn new(
        collaborators: Collaborators,
        format: Arc<IntentionFormat>,
        config: Arc<ReplicationConfig>,
    ) -> Self {
        let reconciler = Reconciler::new(collaborators.commit.clone(), config.apply_interval());
        Self {
            collaborators,
            format,
            reconciler,
            config,
        }
    }

    /// One migration attempt.
    ///
    /// Returns [`LoopControl::Continue`] while servers are still being
    /// upgraded and [`LoopControl::Done`] after cleanup committed.
    pub async fn migrate_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<LoopControl, ReplicationError> {
        if !self.format.supports_config_entries() {
            return Ok(LoopControl::Continue);
        }

        let intentions = self
            .collaborators
            .local
            .legacy_intentions()
            .map_err(|e| ReplicationError::local_state("intentions", e))?;

        // an empty table still goes through cleanup
        let entries = convert_legacy_intentions(&intentions)?;
        let entries = self.filter_migrated(entries)?;
        tracing::debug!(
            intentions = intentions.len(),
            entries = entries.len(),
            "converted legacy intentions"
        );

        let outcome = self
            .reconciler
            .reconcile(cancel, entries, |entry| CommitRequest::ConfigEntry {
                op: ConfigEntryOp::Upsert,
                entry,
            })
            .await
            .map_err(|e| ReplicationError::apply(ResourceKind::ConfigEntries.plural_noun(), e))?;
        if outcome.is_aborted() {
            return Ok(LoopControl::Continue);
        }

        cleanup(self.collaborators.commit.as_ref(), &self.format, false).await?;
        tracing::info!("intention migration complete");
        Ok(LoopControl::Done)
    }

    /// Drop entries whose destination already has a `service-intentions`
    /// entry; those were written natively and must not be overwritten.
    fn filter_migrated(
        &self,
        entries: Vec<ConfigEntry>,
    ) -> Result<Vec<ConfigEntry>, ReplicationError> {
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries {
            let existing = self
                .collaborators
                .local
                .config_entry(&entry.entry_key())
                .map_err(|e| ReplicationError::local_state("config entries", e))?;
            if existing.is_some() {
                tracing::debug!(key = %entry.entry_key(), "destination already migrated");
            } else {
                kept.push(entry);
            }
        }
        Ok(kept)
    }

    /// Retry [`PrimaryMigration::migrate_once`] until it finishes or `cancel`
    /// fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ReplicationError> {
        let this = &self;
        let token = &cancel;
        retry_loop_backoff(
            &cancel,
            &self.config.migration_backoff,
            self.config.migration_pass_interval,
            move || this.migrate_once(token),
            |e: &ReplicationError| {
                tracing::error!(
                    routine = MIGRATION_ROUTINE_NAME,
                    error = %e,
                    "error migrating intentions to config entries, will retry"
                );
            },
        )
        .await;
        Ok(())
    }
}
