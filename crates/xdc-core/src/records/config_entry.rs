//! Centralized configuration entries.
//!
//! Config entries have no single ID. Their identity is the tuple
//! `(kind, enterprise scope, name)` and the diff engine orders them by that
//! tuple, field by field.

use super::{hash_json, Replicable};
use crate::index::RaftIndex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of configuration entry the primary can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigEntryKind {
    ApiGateway,
    ExportedServices,
    IngressGateway,
    Mesh,
    ProxyDefaults,
    ServiceDefaults,
    ServiceIntentions,
    ServiceResolver,
    ServiceRouter,
    ServiceSplitter,
    TerminatingGateway,
}

impl ConfigEntryKind {
    /// Wire name of the kind
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigEntryKind::ApiGateway => "api-gateway",
            ConfigEntryKind::ExportedServices => "exported-services",
            ConfigEntryKind::IngressGateway => "ingress-gateway",
            ConfigEntryKind::Mesh => "mesh",
            ConfigEntryKind::ProxyDefaults => "proxy-defaults",
            ConfigEntryKind::ServiceDefaults => "service-defaults",
            ConfigEntryKind::ServiceIntentions => "service-intentions",
            ConfigEntryKind::ServiceResolver => "service-resolver",
            ConfigEntryKind::ServiceRouter => "service-router",
            ConfigEntryKind::ServiceSplitter => "service-splitter",
            ConfigEntryKind::TerminatingGateway => "terminating-gateway",
        }
    }
}

impl fmt::Display for ConfigEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admin partition and namespace a record lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnterpriseScope {
    pub partition: String,
    pub namespace: String,
}

impl EnterpriseScope {
    /// Name of the default partition and namespace
    pub const DEFAULT: &'static str = "default";

    /// Scope inside the given partition and namespace
    pub fn new(partition: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            namespace: namespace.into(),
        }
    }

    /// Namespace within the default partition
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self::new(Self::DEFAULT, namespace)
    }
}

impl Default for EnterpriseScope {
    fn default() -> Self {
        Self::new(Self::DEFAULT, Self::DEFAULT)
    }
}

impl fmt::Display for EnterpriseScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.namespace)
    }
}

/// Identity and diff order of a config entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigEntryKey {
    pub kind: ConfigEntryKind,
    pub scope: EnterpriseScope,
    pub name: String,
}

impl fmt::Display for ConfigEntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.scope, self.name)
    }
}

/// A configuration entry as stored in the replicated state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub kind: ConfigEntryKind,
    pub name: String,
    pub scope: EnterpriseScope,
    /// Kind-specific document
    pub body: serde_json::Value,
    pub hash: Vec<u8>,
    pub raft_index: RaftIndex,
}

impl ConfigEntry {
    /// Build an entry in the default scope and hash its body
    pub fn new(kind: ConfigEntryKind, name: impl Into<String>, body: serde_json::Value) -> Self {
        let hash = hash_json(&body);
        Self {
            kind,
            name: name.into(),
            scope: EnterpriseScope::default(),
            body,
            hash,
            raft_index: RaftIndex::default(),
        }
    }

    /// Replace the scope
    pub fn with_scope(mut self, scope: EnterpriseScope) -> Self {
        self.scope = scope;
        self
    }

    /// Replace the raft indices
    pub fn with_raft_index(mut self, raft_index: RaftIndex) -> Self {
        self.raft_index = raft_index;
        self
    }

    /// Identity tuple
    pub fn entry_key(&self) -> ConfigEntryKey {
        ConfigEntryKey {
            kind: self.kind,
            scope: self.scope.clone(),
            name: self.name.clone(),
        }
    }
}

impl Replicable for ConfigEntry {
    type Key = ConfigEntryKey;

    fn key(&self) -> ConfigEntryKey {
        self.entry_key()
    }

    fn content_hash(&self) -> &[u8] {
        &self.hash
    }

    fn modify_index(&self) -> u64 {
        self.raft_index.modify_index
    }

    fn estimated_size(&self) -> usize {
        64 + self.name.len() + self.body.to_string().len()
    }
}
