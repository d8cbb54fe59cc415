//! In-memory local replica: consensus log, state store and system metadata.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::Instant;
use xdc_core::records::{
    AclPolicy, AclRole, AclToken, ConfigEntry, ConfigEntryKey, Intention, Replicable,
};
use xdc_core::{CommitError, CommitRequest, ConfigEntryOp, IntentionOp, RaftIndex, StateError};
use xdc_replication::{CommitLog, LocalState, SystemMetadata};

/// One applied commit.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub index: u64,
    pub at: Instant,
    pub request: CommitRequest,
}

#[derive(Debug, Default)]
struct StoreState {
    index: u64,
    policies: BTreeMap<String, AclPolicy>,
    roles: BTreeMap<String, AclRole>,
    tokens: BTreeMap<String, AclToken>,
    /// Tokens still waiting for an accessor ID
    unkeyed_tokens: Vec<AclToken>,
    config_entries: BTreeMap<ConfigEntryKey, ConfigEntry>,
    legacy_intentions: BTreeMap<String, Intention>,
    metadata: BTreeMap<String, String>,
    log: Vec<CommitRecord>,
    rejected_types: BTreeSet<&'static str>,
    failing_commits: usize,
    read_failure: Option<String>,
}

impl StoreState {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }
}

fn stamp(existing: Option<RaftIndex>, index: u64) -> RaftIndex {
    RaftIndex::new(existing.map_or(index, |r| r.create_index), index)
}

/// Local store that applies [`CommitRequest`]s synchronously and keeps a log
/// of everything it applied.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Seeding (bypasses the commit log)
    // =========================================================================

    pub fn seed_policy(&self, mut policy: AclPolicy) {
        let mut state = self.state.lock();
        let index = state.next_index();
        policy.raft_index = RaftIndex::new(index, index);
        state.policies.insert(policy.id.clone(), policy);
    }

    pub fn seed_role(&self, mut role: AclRole) {
        let mut state = self.state.lock();
        let index = state.next_index();
        role.raft_index = RaftIndex::new(index, index);
        state.roles.insert(role.id.clone(), role);
    }

    pub fn seed_token(&self, mut token: AclToken) {
        let mut state = self.state.lock();
        let index = state.next_index();
        token.raft_index = RaftIndex::new(index, index);
        if token.is_placeholder() {
            state.unkeyed_tokens.push(token);
        } else {
            state.tokens.insert(token.accessor_id.clone(), token);
        }
    }

    pub fn seed_config_entry(&self, entry: ConfigEntry) {
        let mut state = self.state.lock();
        let index = state.next_index();
        let entry = entry.with_raft_index(RaftIndex::new(index, index));
        state.config_entries.insert(entry.entry_key(), entry);
    }

    pub fn seed_legacy_intention(&self, mut ixn: Intention) {
        let mut state = self.state.lock();
        let index = state.next_index();
        ixn.raft_index = RaftIndex::new(index, index);
        state.legacy_intentions.insert(ixn.id.clone(), ixn);
    }

    pub fn seed_metadata(&self, key: &str, value: &str) {
        self.state
            .lock()
            .metadata
            .insert(key.to_string(), value.to_string());
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    /// Every commit of `request_type` is rejected by the state machine
    pub fn reject(&self, request_type: &'static str) {
        self.state.lock().rejected_types.insert(request_type);
    }

    pub fn accept_all(&self) {
        let mut state = self.state.lock();
        state.rejected_types.clear();
        state.failing_commits = 0;
    }

    /// The next `count` commits fail as if leadership was lost mid-write
    pub fn fail_next_commits(&self, count: usize) {
        self.state.lock().failing_commits = count;
    }

    /// Every local read fails with `message` until cleared with `None`
    pub fn fail_reads(&self, message: Option<&str>) {
        self.state.lock().read_failure = message.map(str::to_string);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn commits(&self) -> Vec<CommitRecord> {
        self.state.lock().log.clone()
    }

    pub fn commit_types(&self) -> Vec<&'static str> {
        self.state
            .lock()
            .log
            .iter()
            .map(|c| c.request.request_type())
            .collect()
    }

    pub fn commit_count(&self, request_type: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|c| c.request.request_type() == request_type)
            .count()
    }

    pub fn policy(&self, id: &str) -> Option<AclPolicy> {
        self.state.lock().policies.get(id).cloned()
    }

    pub fn policy_ids(&self) -> Vec<String> {
        self.state.lock().policies.keys().cloned().collect()
    }

    pub fn role_ids(&self) -> Vec<String> {
        self.state.lock().roles.keys().cloned().collect()
    }

    pub fn token(&self, accessor_id: &str) -> Option<AclToken> {
        self.state.lock().tokens.get(accessor_id).cloned()
    }

    pub fn token_ids(&self) -> Vec<String> {
        self.state.lock().tokens.keys().cloned().collect()
    }

    pub fn config_entry_keys(&self) -> Vec<ConfigEntryKey> {
        self.state.lock().config_entries.keys().cloned().collect()
    }

    pub fn legacy_intention_ids(&self) -> Vec<String> {
        self.state.lock().legacy_intentions.keys().cloned().collect()
    }

    pub fn metadata(&self, key: &str) -> Option<String> {
        self.state.lock().metadata.get(key).cloned()
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T, StateError> {
        let state = self.state.lock();
        match &state.read_failure {
            Some(message) => Err(StateError::new(message.clone())),
            None => Ok(f(&state)),
        }
    }
}

fn apply_request(state: &mut StoreState, request: &CommitRequest, index: u64) {
    match request {
        CommitRequest::AclPolicySet(policies) => {
            for policy in policies {
                let mut policy = policy.clone();
                let existing = state.policies.get(&policy.id).map(|p| p.raft_index);
                policy.raft_index = stamp(existing, index);
                state.policies.insert(policy.id.clone(), policy);
            }
        }
        CommitRequest::AclPolicyDelete(ids) => {
            for id in ids {
                state.policies.remove(id);
            }
        }
        CommitRequest::AclRoleSet(roles) => {
            for role in roles {
                let mut role = role.clone();
                let existing = state.roles.get(&role.id).map(|r| r.raft_index);
                role.raft_index = stamp(existing, index);
                state.roles.insert(role.id.clone(), role);
            }
        }
        CommitRequest::AclRoleDelete(ids) => {
            for id in ids {
                state.roles.remove(id);
            }
        }
        CommitRequest::AclTokenSet(tokens) => {
            for token in tokens {
                let mut token = token.clone();
                let existing = state.tokens.get(&token.accessor_id).map(|t| t.raft_index);
                token.raft_index = stamp(existing, index);
                state.tokens.insert(token.accessor_id.clone(), token);
            }
        }
        CommitRequest::AclTokenDelete(ids) => {
            for id in ids {
                state.tokens.remove(id);
            }
        }
        CommitRequest::ConfigEntry { op, entry } => {
            let key = entry.entry_key();
            match op {
                ConfigEntryOp::Upsert => {
                    let existing = state.config_entries.get(&key).map(|e| e.raft_index);
                    let entry = entry.clone().with_raft_index(stamp(existing, index));
                    state.config_entries.insert(key, entry);
                }
                ConfigEntryOp::Delete => {
                    state.config_entries.remove(&key);
                }
            }
        }
        CommitRequest::IntentionTxn(ops) => {
            for op in ops {
                match op {
                    IntentionOp::Upsert(ixn) => {
                        let mut ixn = ixn.clone();
                        let existing = state.legacy_intentions.get(&ixn.id).map(|i| i.raft_index);
                        ixn.raft_index = stamp(existing, index);
                        state.legacy_intentions.insert(ixn.id.clone(), ixn);
                    }
                    IntentionOp::Delete(id) => {
                        state.legacy_intentions.remove(id);
                    }
                }
            }
        }
        CommitRequest::IntentionDeleteAll => state.legacy_intentions.clear(),
        CommitRequest::SystemMetadataSet { key, value } => {
            state.metadata.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl CommitLog for InMemoryStore {
    async fn apply(&self, request: CommitRequest) -> Result<u64, CommitError> {
        let mut state = self.state.lock();
        let request_type = request.request_type();

        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(CommitError::log(request_type, "leadership lost"));
        }
        if state.rejected_types.contains(request_type) {
            return Err(CommitError::rejected(request_type, "rejected by test"));
        }

        let index = state.next_index();
        apply_request(&mut state, &request, index);
        state.log.push(CommitRecord {
            index,
            at: Instant::now(),
            request,
        });
        Ok(index)
    }
}

impl LocalState for InMemoryStore {
    fn policies(&self) -> Result<Vec<AclPolicy>, StateError> {
        self.read(|s| s.policies.values().cloned().collect())
    }

    fn roles(&self) -> Result<Vec<AclRole>, StateError> {
        self.read(|s| s.roles.values().cloned().collect())
    }

    fn global_tokens(&self) -> Result<Vec<AclToken>, StateError> {
        self.read(|s| {
            s.tokens
                .values()
                .chain(s.unkeyed_tokens.iter())
                .filter(|t| !t.local)
                .cloned()
                .collect()
        })
    }

    fn config_entries(&self) -> Result<Vec<ConfigEntry>, StateError> {
        self.read(|s| s.config_entries.values().cloned().collect())
    }

    fn config_entry(&self, key: &ConfigEntryKey) -> Result<Option<ConfigEntry>, StateError> {
        self.read(|s| s.config_entries.get(key).cloned())
    }

    fn legacy_intentions(&self) -> Result<Vec<Intention>, StateError> {
        self.read(|s| s.legacy_intentions.values().cloned().collect())
    }
}

impl SystemMetadata for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        self.read(|s| s.metadata.get(key).cloned())
    }
}
