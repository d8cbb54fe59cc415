//! Legacy intention migration runners.
//!
//! The primary converts its legacy intentions into `service-intentions`
//! config entries and then clears the legacy table. Secondaries walk the
//! [`xdc_core::migration`] state machine until they can safely clear their
//! own copy. Both finish by recording [`INTENTION_FORMAT_KEY`] in system
//! metadata, after which every later leader term skips migration entirely.

pub mod primary;
pub mod secondary;

pub use primary::PrimaryMigration;
pub use secondary::SecondaryMigration;

use crate::collaborators::{ClusterFeatures, CommitLog, SystemMetadata};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use xdc_core::migration::{INTENTION_FORMAT_CONFIG_ENTRY, INTENTION_FORMAT_KEY};
use xdc_core::records::{migrate_intentions, ConfigEntry, Intention};
use xdc_core::{CommitRequest, ReplicationError};

/// Leader routine name shared by the primary and secondary runners.
pub const MIGRATION_ROUTINE_NAME: &str = "legacy intention migration";

/// Whether this datacenter serves intentions from config entries.
///
/// True once gossip reports every server compatible, or once this node has
/// seen migration complete. The latter is sticky for the process lifetime.
pub struct IntentionFormat {
    features: Arc<dyn ClusterFeatures>,
    converted: AtomicBool,
}

impl IntentionFormat {
    pub fn new(features: Arc<dyn ClusterFeatures>) -> Self {
        Self {
            features,
            converted: AtomicBool::new(false),
        }
    }

    pub fn supports_config_entries(&self) -> bool {
        self.is_converted() || self.features.supports_intentions_as_config_entries()
    }

    /// Migration was observed complete on this node
    pub fn is_converted(&self) -> bool {
        self.converted.load(Ordering::Acquire)
    }

    pub fn mark_converted(&self) {
        self.converted.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for IntentionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentionFormat")
            .field("converted", &self.is_converted())
            .finish_non_exhaustive()
    }
}

/// Completion flag is already present in system metadata.
pub fn completion_recorded(metadata: &dyn SystemMetadata) -> Result<bool, ReplicationError> {
    let value = metadata
        .get(INTENTION_FORMAT_KEY)
        .map_err(|e| ReplicationError::local_state("system metadata", e))?;
    Ok(value.as_deref() == Some(INTENTION_FORMAT_CONFIG_ENTRY))
}

/// Group, normalize and validate legacy intentions into config entries.
///
/// Any invalid destination fails the whole conversion.
pub fn convert_legacy_intentions(
    intentions: &[Intention],
) -> Result<Vec<ConfigEntry>, ReplicationError> {
    migrate_intentions(intentions)
        .into_iter()
        .map(|mut entry| {
            entry.legacy_normalize();
            entry.legacy_validate()?;
            entry.into_config_entry()
        })
        .collect()
}

/// Clear the legacy table and record that config entries are canonical.
///
/// `quiet` suppresses the info log for the inline cleanup done at
/// leadership establishment on a datacenter that never had intentions.
pub async fn cleanup(
    commit: &dyn CommitLog,
    format: &IntentionFormat,
    quiet: bool,
) -> Result<(), ReplicationError> {
    if !quiet {
        tracing::info!("finishing up intention migration by clearing the legacy store");
    }

    commit.apply(CommitRequest::IntentionDeleteAll).await?;
    commit
        .apply(CommitRequest::SystemMetadataSet {
            key: INTENTION_FORMAT_KEY.to_string(),
            value: INTENTION_FORMAT_CONFIG_ENTRY.to_string(),
        })
        .await?;

    format.mark_converted();
    Ok(())
}
