//! ACL policy, role and token delegates.
//!
//! The primary lists stubs; full records are read back only for the IDs
//! the diff selected for upsert, before anything is deleted. Deletions go
//! out in fixed-count batches and upserts in size-bounded batches.

use super::{delete_in_batches, upsert_in_batches, ApplyContext, ReplicationDelegate};
use crate::collaborators::Collaborators;
use crate::reconciler::ReconcileOutcome;
use async_trait::async_trait;
use xdc_core::records::{
    AclPolicy, AclPolicyStub, AclRole, AclRoleStub, AclToken, AclTokenStub, Replicable,
    ResourceKind,
};
use xdc_core::{CommitRequest, Indexed, QueryOptions, ReplicationError, RpcError, StateError};

fn stub_ids<T: Replicable<Key = String>>(stubs: &[T]) -> Vec<String> {
    stubs.iter().map(Replicable::key).collect()
}

// =============================================================================
// Policies
// =============================================================================

pub struct PolicyReplication {
    collaborators: Collaborators,
}

impl PolicyReplication {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

#[async_trait]
impl ReplicationDelegate for PolicyReplication {
    type Local = AclPolicy;
    type Remote = AclPolicyStub;
    type Upsert = AclPolicy;

    fn kind(&self) -> ResourceKind {
        ResourceKind::AclPolicies
    }

    async fn fetch_remote(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclPolicyStub>>, RpcError> {
        self.collaborators.primary.list_policies(opts).await
    }

    fn fetch_local(&self) -> Result<Vec<AclPolicy>, StateError> {
        self.collaborators.local.policies()
    }

    async fn delete_local(
        &self,
        ctx: &ApplyContext<'_>,
        keys: Vec<String>,
    ) -> Result<ReconcileOutcome, ReplicationError> {
        delete_in_batches(ctx, self.kind(), keys, CommitRequest::AclPolicyDelete).await
    }

    async fn prepare_upserts(
        &self,
        ctx: &ApplyContext<'_>,
        records: Vec<AclPolicyStub>,
    ) -> Result<Vec<AclPolicy>, ReplicationError> {
        let full = self
            .collaborators
            .primary
            .read_policies(&stub_ids(&records), ctx.opts)
            .await
            .map_err(|e| ReplicationError::fetch(self.kind().plural_noun(), e))?;
        tracing::debug!(amount = full.items.len(), "fetched policy updates");
        Ok(full.items)
    }

    async fn upsert_local(
        &self,
        ctx: &ApplyContext<'_>,
        records: Vec<AclPolicy>,
    ) -> Result<ReconcileOutcome, ReplicationError> {
        upsert_in_batches(ctx, self.kind(), records, CommitRequest::AclPolicySet).await
    }
}

// =============================================================================
// Roles
// =============================================================================

pub struct RoleReplication {
    collaborators: Collaborators,
}

impl RoleReplication {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

#[async_trait]
impl ReplicationDelegate for RoleReplication {
    type Local = AclRole;
    type Remote = AclRoleStub;
    type Upsert = AclRole;

    fn kind(&self) -> ResourceKind {
        ResourceKind::AclRoles
    }

    async fn fetch_remote(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclRoleStub>>, RpcError> {
        self.collaborators.primary.list_roles(opts).await
    }

    fn fetch_local(&self) -> Result<Vec<AclRole>, StateError> {
        self.collaborators.local.roles()
    }

    async fn delete_local(
        &self,
        ctx: &ApplyContext<'_>,
        keys: Vec<String>,
    ) -> Result<ReconcileOutcome, ReplicationError> {
        delete_in_batches(ctx, self.kind(), keys, CommitRequest::AclRoleDelete).await
    }

    async fn prepare_upserts(
        &self,
        ctx: &ApplyContext<'_>,
        records: Vec<AclRoleStub>,
    ) -> Result<Vec<AclRole>, ReplicationError> {
        let full = self
            .collaborators
            .primary
            .read_roles(&stub_ids(&records), ctx.opts)
            .await
            .map_err(|e| ReplicationError::fetch(self.kind().plural_noun(), e))?;
        tracing::debug!(amount = full.items.len(), "fetched role updates");
        Ok(full.items)
    }

    async fn upsert_local(
        &self,
        ctx: &ApplyContext<'_>,
        records: Vec<AclRole>,
    ) -> Result<ReconcileOutcome, ReplicationError> {
        upsert_in_batches(ctx, self.kind(), records, CommitRequest::AclRoleSet).await
    }
}

// =============================================================================
// Tokens
// =============================================================================

/// Global token replication.
///
/// A replication token without `acl:write` gets secrets back redacted;
/// writing those would wipe every replicated token's secret, so the whole
/// pass fails instead.
pub struct TokenReplication {
    collaborators: Collaborators,
}

impl TokenReplication {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

#[async_trait]
impl ReplicationDelegate for TokenReplication {
    type Local = AclToken;
    type Remote = AclTokenStub;
    type Upsert = AclToken;

    fn kind(&self) -> ResourceKind {
        ResourceKind::AclTokens
    }

    async fn fetch_remote(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclTokenStub>>, RpcError> {
        self.collaborators.primary.list_tokens(opts).await
    }

    fn fetch_local(&self) -> Result<Vec<AclToken>, StateError> {
        self.collaborators.local.global_tokens()
    }

    async fn delete_local(
        &self,
        ctx: &ApplyContext<'_>,
        keys: Vec<String>,
    ) -> Result<ReconcileOutcome, ReplicationError> {
        delete_in_batches(ctx, self.kind(), keys, CommitRequest::AclTokenDelete).await
    }

    async fn prepare_upserts(
        &self,
        ctx: &ApplyContext<'_>,
        records: Vec<AclTokenStub>,
    ) -> Result<Vec<AclToken>, ReplicationError> {
        let kind = self.kind();
        let full = self
            .collaborators
            .primary
            .read_tokens(&stub_ids(&records), ctx.opts)
            .await
            .map_err(|e| ReplicationError::fetch(kind.plural_noun(), e))?;

        if full.items.iter().any(AclToken::is_redacted) {
            return Err(ReplicationError::RedactedData {
                noun: kind.singular_noun(),
            });
        }
        tracing::debug!(amount = full.items.len(), "fetched token updates");
        Ok(full.items)
    }

    async fn upsert_local(
        &self,
        ctx: &ApplyContext<'_>,
        records: Vec<AclToken>,
    ) -> Result<ReconcileOutcome, ReplicationError> {
        upsert_in_batches(ctx, self.kind(), records, CommitRequest::AclTokenSet).await
    }
}
