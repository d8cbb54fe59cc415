//! Interfaces to the rest of the server.
//!
//! The engine never touches consensus, storage or the network directly; it
//! goes through these traits. Reads of the local replica are synchronous
//! (they hit an in-memory snapshot), everything crossing a process or
//! datacenter boundary is async.

use async_trait::async_trait;
use std::sync::Arc;
use xdc_core::records::{
    AclPolicy, AclPolicyStub, AclRole, AclRoleStub, AclToken, AclTokenStub, ConfigEntry,
    ConfigEntryKey, DataOrigin, Intention,
};
use xdc_core::{CommitError, CommitRequest, Indexed, QueryOptions, RpcError, StateError};

/// Write path into the local consensus log.
#[async_trait]
pub trait CommitLog: Send + Sync {
    /// Commit `request` and return the log index it was applied at
    async fn apply(&self, request: CommitRequest) -> Result<u64, CommitError>;
}

/// Legacy intentions listing, tagged with where the primary read them from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentionListing {
    pub index: u64,
    pub intentions: Vec<Intention>,
    /// `None` for primaries that predate config entry intentions
    pub data_origin: Option<DataOrigin>,
}

/// RPC client for the primary datacenter.
///
/// Every `list_*` call is a blocking query: when
/// [`QueryOptions::min_query_index`] is non-zero the primary holds the
/// request until its index moves past that value or its own timeout fires.
#[async_trait]
pub trait PrimaryDatacenter: Send + Sync {
    async fn list_policies(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclPolicyStub>>, RpcError>;

    async fn read_policies(
        &self,
        ids: &[String],
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclPolicy>>, RpcError>;

    async fn list_roles(&self, opts: &QueryOptions) -> Result<Indexed<Vec<AclRoleStub>>, RpcError>;

    async fn read_roles(
        &self,
        ids: &[String],
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclRole>>, RpcError>;

    /// Global tokens only; local tokens never leave their datacenter
    async fn list_tokens(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclTokenStub>>, RpcError>;

    async fn read_tokens(
        &self,
        accessor_ids: &[String],
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclToken>>, RpcError>;

    async fn list_config_entries(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<ConfigEntry>>, RpcError>;

    /// Intentions as currently served, from whichever store is canonical
    async fn list_intentions(&self, opts: &QueryOptions) -> Result<IntentionListing, RpcError>;

    /// Rows still present in the primary's legacy table
    async fn list_legacy_intentions(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<Intention>>, RpcError>;
}

/// Read access to the local replica.
pub trait LocalState: Send + Sync {
    fn policies(&self) -> Result<Vec<AclPolicy>, StateError>;

    fn roles(&self) -> Result<Vec<AclRole>, StateError>;

    /// Global tokens only
    fn global_tokens(&self) -> Result<Vec<AclToken>, StateError>;

    fn config_entries(&self) -> Result<Vec<ConfigEntry>, StateError>;

    fn config_entry(&self, key: &ConfigEntryKey) -> Result<Option<ConfigEntry>, StateError>;

    fn legacy_intentions(&self) -> Result<Vec<Intention>, StateError>;
}

/// Durable key/value metadata maintained by the consensus state machine.
///
/// Writes go through [`CommitLog`] as [`CommitRequest::SystemMetadataSet`].
pub trait SystemMetadata: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StateError>;
}

/// Cluster-wide feature detection derived from gossip.
pub trait ClusterFeatures: Send + Sync {
    /// Every server in this datacenter and the primary can serve intentions
    /// from config entries
    fn supports_intentions_as_config_entries(&self) -> bool;
}

/// Credentials used for requests to the primary.
pub trait ReplicationCredentials: Send + Sync {
    /// Replication token, `None` until the operator configures one
    fn replication_token(&self) -> Option<String>;
}

/// Every collaborator the engine needs, bundled for cheap cloning into tasks.
#[derive(Clone)]
pub struct Collaborators {
    pub commit: Arc<dyn CommitLog>,
    pub primary: Arc<dyn PrimaryDatacenter>,
    pub local: Arc<dyn LocalState>,
    pub metadata: Arc<dyn SystemMetadata>,
    pub features: Arc<dyn ClusterFeatures>,
    pub credentials: Arc<dyn ReplicationCredentials>,
}

impl Collaborators {
    /// Replication token if one is configured and non-empty
    pub fn replication_token(&self) -> Option<String> {
        self.credentials
            .replication_token()
            .filter(|token| !token.is_empty())
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
