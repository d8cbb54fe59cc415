//! Config entry delegate.
//!
//! The primary lists full entries, so nothing is read back. Each change is
//! committed on its own, throttled by the reconciler.

use super::{ApplyContext, ReplicationDelegate};
use crate::collaborators::Collaborators;
use crate::reconciler::ReconcileOutcome;
use async_trait::async_trait;
use xdc_core::records::{ConfigEntry, ConfigEntryKey, ResourceKind};
use xdc_core::{
    CommitRequest, ConfigEntryOp, Indexed, QueryOptions, ReplicationError, RpcError, StateError,
};

pub struct ConfigEntryReplication {
    collaborators: Collaborators,
}

impl ConfigEntryReplication {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

/// Delete requests only need the identity; the body is left empty.
fn tombstone(key: ConfigEntryKey) -> ConfigEntry {
    ConfigEntry::new(key.kind, key.name, serde_json::Value::Null).with_scope(key.scope)
}

#[async_trait]
impl ReplicationDelegate for ConfigEntryReplication {
    type Local = ConfigEntry;
    type Remote = ConfigEntry;
    type Upsert = ConfigEntry;

    fn kind(&self) -> ResourceKind {
        ResourceKind::ConfigEntries
    }

    async fn fetch_remote(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<ConfigEntry>>, RpcError> {
        self.collaborators.primary.list_config_entries(opts).await
    }

    fn fetch_local(&self) -> Result<Vec<ConfigEntry>, StateError> {
        self.collaborators.local.config_entries()
    }

    async fn delete_local(
        &self,
        ctx: &ApplyContext<'_>,
        keys: Vec<ConfigEntryKey>,
    ) -> Result<ReconcileOutcome, ReplicationError> {
        ctx.reconciler
            .reconcile(ctx.cancel, keys, |key| CommitRequest::ConfigEntry {
                op: ConfigEntryOp::Delete,
                entry: tombstone(key),
            })
            .await
            .map_err(|e| ReplicationError::apply(self.kind().plural_noun(), e))
    }

    async fn prepare_upserts(
        &self,
        _ctx: &ApplyContext<'_>,
        records: Vec<ConfigEntry>,
    ) -> Result<Vec<ConfigEntry>, ReplicationError> {
        Ok(records)
    }

    async fn upsert_local(
        &self,
        ctx: &ApplyContext<'_>,
        records: Vec<ConfigEntry>,
    ) -> Result<ReconcileOutcome, ReplicationError> {
        ctx.reconciler
            .reconcile(ctx.cancel, records, |entry| CommitRequest::ConfigEntry {
                op: ConfigEntryOp::Upsert,
                entry,
            })
            .await
            .map_err(|e| ReplicationError::apply(self.kind().plural_noun(), e))
    }
}
