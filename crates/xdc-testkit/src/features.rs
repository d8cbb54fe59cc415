//! Switchable cluster capability and credential sources.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use xdc_replication::{ClusterFeatures, ReplicationCredentials};

/// Gossip view that reports whatever the test last set.
#[derive(Debug, Default)]
pub struct StaticFeatures {
    config_entry_intentions: AtomicBool,
}

impl StaticFeatures {
    pub fn new(config_entry_intentions: bool) -> Self {
        Self {
            config_entry_intentions: AtomicBool::new(config_entry_intentions),
        }
    }

    /// Flip whether every server appears to support config entry intentions
    pub fn set(&self, supported: bool) {
        self.config_entry_intentions.store(supported, Ordering::SeqCst);
    }
}

impl ClusterFeatures for StaticFeatures {
    fn supports_intentions_as_config_entries(&self) -> bool {
        self.config_entry_intentions.load(Ordering::SeqCst)
    }
}

/// Replication token that can be rotated or removed mid-test.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: Mutex<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: Mutex::new(token.map(str::to_string)),
        }
    }

    pub fn set(&self, token: Option<&str>) {
        *self.token.lock() = token.map(str::to_string);
    }
}

impl ReplicationCredentials for StaticCredentials {
    fn replication_token(&self) -> Option<String> {
        self.token.lock().clone()
    }
}
