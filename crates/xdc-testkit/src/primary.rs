//! Fake primary datacenter answering blocking queries from memory.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::sync::watch;
use xdc_core::records::acl::REDACTED_SECRET;
use xdc_core::records::{
    AclPolicy, AclPolicyStub, AclRole, AclRoleStub, AclToken, AclTokenStub, ConfigEntry,
    ConfigEntryKey, DataOrigin, Intention,
};
use xdc_core::{Indexed, QueryOptions, RaftIndex, RpcError};
use xdc_replication::{IntentionListing, PrimaryDatacenter};

/// How long a blocking query waits for the index to move.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct PrimaryState {
    index: u64,
    policies: BTreeMap<String, AclPolicy>,
    roles: BTreeMap<String, AclRole>,
    tokens: BTreeMap<String, AclToken>,
    unkeyed_tokens: Vec<AclToken>,
    config_entries: BTreeMap<ConfigEntryKey, ConfigEntry>,
    legacy_intentions: BTreeMap<String, Intention>,
    data_origin: Option<DataOrigin>,
    redact_secrets: bool,
    failures: VecDeque<RpcError>,
    method_failures: Vec<(&'static str, RpcError)>,
    queries: Vec<(&'static str, QueryOptions)>,
}

impl PrimaryState {
    fn bump(&mut self) -> RaftIndex {
        self.stamp(None)
    }

    /// Advance the index, keeping the create index of an existing record
    fn stamp(&mut self, existing: Option<RaftIndex>) -> RaftIndex {
        self.index += 1;
        RaftIndex::new(existing.map_or(self.index, |r| r.create_index), self.index)
    }
}

/// Primary datacenter with mutable state and failure injection.
///
/// Every mutation advances the primary's index and wakes blocked queries. A
/// query with a non-zero `min_query_index` returns once the index differs
/// from it (a lower index means the primary was rebuilt) or after the block
/// timeout.
#[derive(Debug)]
pub struct FakePrimary {
    state: Mutex<PrimaryState>,
    index_tx: watch::Sender<u64>,
    block_timeout: Duration,
}

impl FakePrimary {
    pub fn new() -> Self {
        Self::with_block_timeout(DEFAULT_BLOCK_TIMEOUT)
    }

    pub fn with_block_timeout(block_timeout: Duration) -> Self {
        let (index_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(PrimaryState {
                data_origin: Some(DataOrigin::Legacy),
                ..Default::default()
            }),
            index_tx,
            block_timeout,
        }
    }

    pub fn index(&self) -> u64 {
        self.state.lock().index
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut PrimaryState) -> T) -> T {
        let (result, index) = {
            let mut state = self.state.lock();
            let result = f(&mut state);
            (result, state.index)
        };
        self.index_tx.send_replace(index);
        result
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub fn upsert_policy(&self, mut policy: AclPolicy) -> u64 {
        self.mutate(|s| {
            let existing = s.policies.get(&policy.id).map(|p| p.raft_index);
            policy.raft_index = s.stamp(existing);
            s.policies.insert(policy.id.clone(), policy);
            s.index
        })
    }

    pub fn delete_policy(&self, id: &str) -> u64 {
        self.mutate(|s| {
            s.policies.remove(id);
            s.bump().modify_index
        })
    }

    pub fn upsert_role(&self, mut role: AclRole) -> u64 {
        self.mutate(|s| {
            let existing = s.roles.get(&role.id).map(|r| r.raft_index);
            role.raft_index = s.stamp(existing);
            s.roles.insert(role.id.clone(), role);
            s.index
        })
    }

    pub fn delete_role(&self, id: &str) -> u64 {
        self.mutate(|s| {
            s.roles.remove(id);
            s.bump().modify_index
        })
    }

    /// Tokens without an accessor are served as-is; replication skips them.
    pub fn upsert_token(&self, mut token: AclToken) -> u64 {
        self.mutate(|s| {
            if token.accessor_id.is_empty() {
                token.raft_index = s.bump();
                s.unkeyed_tokens.push(token);
            } else {
                let existing = s.tokens.get(&token.accessor_id).map(|t| t.raft_index);
                token.raft_index = s.stamp(existing);
                s.tokens.insert(token.accessor_id.clone(), token);
            }
            s.index
        })
    }

    pub fn delete_token(&self, accessor_id: &str) -> u64 {
        self.mutate(|s| {
            s.tokens.remove(accessor_id);
            s.bump().modify_index
        })
    }

    pub fn upsert_config_entry(&self, entry: ConfigEntry) -> u64 {
        self.mutate(|s| {
            let key = entry.entry_key();
            let existing = s.config_entries.get(&key).map(|e| e.raft_index);
            let entry = entry.with_raft_index(s.stamp(existing));
            s.config_entries.insert(key, entry);
            s.index
        })
    }

    pub fn delete_config_entry(&self, key: &ConfigEntryKey) -> u64 {
        self.mutate(|s| {
            s.config_entries.remove(key);
            s.bump().modify_index
        })
    }

    pub fn upsert_legacy_intention(&self, mut ixn: Intention) -> u64 {
        self.mutate(|s| {
            ixn.raft_index = s.bump();
            s.legacy_intentions.insert(ixn.id.clone(), ixn);
            s.index
        })
    }

    pub fn delete_legacy_intention(&self, id: &str) -> u64 {
        self.mutate(|s| {
            s.legacy_intentions.remove(id);
            s.bump().modify_index
        })
    }

    /// Empty the legacy table as the primary's own migration would and
    /// return the index of that write.
    pub fn clear_legacy_intentions(&self) -> u64 {
        self.mutate(|s| {
            s.legacy_intentions.clear();
            s.bump().modify_index
        })
    }

    /// Simulate a rebuilt primary whose index restarts at `index`.
    pub fn reset_index(&self, index: u64) {
        self.mutate(|s| s.index = index);
    }

    pub fn set_data_origin(&self, origin: Option<DataOrigin>) {
        self.mutate(|s| {
            s.data_origin = origin;
            s.bump();
        });
    }

    /// Serve token secrets redacted, as for a token without `acl:write`
    pub fn set_redact_secrets(&self, redact: bool) {
        self.state.lock().redact_secrets = redact;
    }

    /// Queue `count` failures returned by the next RPCs, in order
    pub fn fail_next(&self, count: usize, err: RpcError) {
        let mut state = self.state.lock();
        state.failures.extend(std::iter::repeat(err).take(count));
    }

    /// Fail the next call of `method` only
    pub fn fail_next_call(&self, method: &'static str, err: RpcError) {
        self.state.lock().method_failures.push((method, err));
    }

    /// Every query received, in arrival order
    pub fn queries(&self) -> Vec<(&'static str, QueryOptions)> {
        self.state.lock().queries.clone()
    }

    pub fn query_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .queries
            .iter()
            .filter(|(m, _)| *m == method)
            .count()
    }

    // =========================================================================
    // Query plumbing
    // =========================================================================

    async fn serve<T>(
        &self,
        method: &'static str,
        opts: &QueryOptions,
        read: impl FnOnce(&PrimaryState) -> T,
    ) -> Result<Indexed<T>, RpcError> {
        {
            let mut state = self.state.lock();
            state.queries.push((method, opts.clone()));
            if let Some(pos) = state.method_failures.iter().position(|(m, _)| *m == method) {
                return Err(state.method_failures.remove(pos).1);
            }
            if let Some(err) = state.failures.pop_front() {
                return Err(err);
            }
        }

        if opts.min_query_index > 0 {
            let min = opts.min_query_index;
            let mut rx = self.index_tx.subscribe();
            let moved = async {
                loop {
                    if *rx.borrow_and_update() != min {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        return;
                    }
                }
            };
            // a timeout answers with the unchanged index
            let _ = tokio::time::timeout(self.block_timeout, moved).await;
        }

        let state = self.state.lock();
        Ok(Indexed::new(state.index, read(&state)))
    }
}

impl Default for FakePrimary {
    fn default() -> Self {
        Self::new()
    }
}

fn by_ids<T: Clone>(records: &BTreeMap<String, T>, ids: &[String]) -> Vec<T> {
    ids.iter().filter_map(|id| records.get(id).cloned()).collect()
}

#[async_trait]
impl PrimaryDatacenter for FakePrimary {
    async fn list_policies(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclPolicyStub>>, RpcError> {
        self.serve("ACL.PolicyList", opts, |s| {
            s.policies.values().map(AclPolicy::stub).collect()
        })
        .await
    }

    async fn read_policies(
        &self,
        ids: &[String],
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclPolicy>>, RpcError> {
        self.serve("ACL.PolicyBatchRead", opts, |s| by_ids(&s.policies, ids)).await
    }

    async fn list_roles(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclRoleStub>>, RpcError> {
        self.serve("ACL.RoleList", opts, |s| s.roles.values().map(AclRole::stub).collect())
            .await
    }

    async fn read_roles(
        &self,
        ids: &[String],
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclRole>>, RpcError> {
        self.serve("ACL.RoleBatchRead", opts, |s| by_ids(&s.roles, ids)).await
    }

    async fn list_tokens(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclTokenStub>>, RpcError> {
        self.serve("ACL.TokenList", opts, |s| {
            s.tokens
                .values()
                .chain(s.unkeyed_tokens.iter())
                .filter(|t| !t.local)
                .map(AclToken::stub)
                .collect()
        })
        .await
    }

    async fn read_tokens(
        &self,
        accessor_ids: &[String],
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<AclToken>>, RpcError> {
        self.serve("ACL.TokenBatchRead", opts, |s| {
            let mut tokens = by_ids(&s.tokens, accessor_ids);
            if s.redact_secrets {
                for token in &mut tokens {
                    token.secret_id = REDACTED_SECRET.to_string();
                }
            }
            tokens
        })
        .await
    }

    async fn list_config_entries(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<ConfigEntry>>, RpcError> {
        self.serve("ConfigEntry.ListAll", opts, |s| {
            s.config_entries.values().cloned().collect()
        })
        .await
    }

    async fn list_intentions(&self, opts: &QueryOptions) -> Result<IntentionListing, RpcError> {
        let served = self
            .serve("Intention.List", opts, |s| {
                let intentions = if s.data_origin == Some(DataOrigin::ConfigEntries) {
                    Vec::new()
                } else {
                    s.legacy_intentions.values().cloned().collect()
                };
                (intentions, s.data_origin)
            })
            .await?;
        let (intentions, data_origin) = served.items;
        Ok(IntentionListing {
            index: served.index,
            intentions,
            data_origin,
        })
    }

    async fn list_legacy_intentions(
        &self,
        opts: &QueryOptions,
    ) -> Result<Indexed<Vec<Intention>>, RpcError> {
        self.serve("Intention.ListLegacy", opts, |s| {
            s.legacy_intentions.values().cloned().collect()
        })
        .await
    }
}
