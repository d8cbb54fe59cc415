//! Testing infrastructure for the replication engine.
//!
//! In-memory stand-ins for every collaborator the engine talks to, record
//! fixtures and proptest strategies. [`Harness`] wires one datacenter's
//! worth of fakes into a [`Collaborators`] bundle.
//!
//! ```rust,no_run
//! use xdc_testkit::{fixtures, Harness};
//!
//! let harness = Harness::new();
//! harness.primary.upsert_policy(fixtures::policy("global-management", "acl = \"write\""));
//! let collaborators = harness.collaborators();
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

pub mod features;
pub mod fixtures;
pub mod primary;
pub mod store;
pub mod strategies;

pub use features::{StaticCredentials, StaticFeatures};
pub use primary::FakePrimary;
pub use store::{CommitRecord, InMemoryStore};

use std::sync::Arc;
use std::time::Duration;
use xdc_core::{ConfigError, ReplicationConfig};
use xdc_replication::{Collaborators, ReplicationEngine};

/// Replication token handed out by [`Harness::new`].
pub const TEST_REPLICATION_TOKEN: &str = "replication-secret";

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One datacenter's collaborators plus a fake primary to replicate from.
#[derive(Debug, Clone)]
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub primary: Arc<FakePrimary>,
    pub features: Arc<StaticFeatures>,
    pub credentials: Arc<StaticCredentials>,
}

impl Harness {
    /// Empty local store and primary, gossip reporting legacy-only servers,
    /// and a configured replication token.
    pub fn new() -> Self {
        init_tracing();
        Self {
            store: Arc::new(InMemoryStore::new()),
            primary: Arc::new(FakePrimary::new()),
            features: Arc::new(StaticFeatures::new(false)),
            credentials: Arc::new(StaticCredentials::new(Some(TEST_REPLICATION_TOKEN))),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            commit: self.store.clone(),
            primary: self.primary.clone(),
            local: self.store.clone(),
            metadata: self.store.clone(),
            features: self.features.clone(),
            credentials: self.credentials.clone(),
        }
    }

    pub fn engine(&self, config: ReplicationConfig) -> Result<ReplicationEngine, ConfigError> {
        ReplicationEngine::new(config, self.collaborators())
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout`
/// elapses. Returns whether it held.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
