//! Service intentions in both storage formats.
//!
//! Legacy intentions live in their own table, one row per source and
//! destination pair. The newer format groups every source for a destination
//! into a single `service-intentions` config entry. [`migrate_intentions`]
//! converts the former into the latter.

use super::config_entry::{ConfigEntry, ConfigEntryKey, ConfigEntryKind, EnterpriseScope};
use super::{hash_json, Comparison, Replicable};
use crate::errors::ReplicationError;
use crate::index::RaftIndex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Matches any namespace or service name.
pub const WILDCARD: &str = "*";

/// Decision an intention enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentionAction {
    Allow,
    Deny,
}

/// Layer 7 rule attached to an intention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentionPermission {
    pub action: IntentionAction,
    pub path_prefix: Option<String>,
    pub methods: Vec<String>,
}

/// Where the primary's intentions are currently read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataOrigin {
    /// The legacy intentions table
    Legacy,
    /// `service-intentions` config entries
    ConfigEntries,
}

/// A row of the legacy intentions table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intention {
    pub id: String,
    pub source_namespace: String,
    pub source_name: String,
    pub destination_namespace: String,
    pub destination_name: String,
    /// Absent when the intention is expressed through `permissions`
    pub action: Option<IntentionAction>,
    pub description: String,
    pub precedence: i32,
    pub meta: BTreeMap<String, String>,
    pub permissions: Vec<IntentionPermission>,
    pub hash: Vec<u8>,
    pub raft_index: RaftIndex,
}

impl Intention {
    /// A legacy allow/deny intention in the default namespaces
    pub fn new(
        id: impl Into<String>,
        source_name: impl Into<String>,
        destination_name: impl Into<String>,
        action: IntentionAction,
    ) -> Self {
        let mut ixn = Self {
            id: id.into(),
            source_namespace: EnterpriseScope::DEFAULT.to_string(),
            source_name: source_name.into(),
            destination_namespace: EnterpriseScope::DEFAULT.to_string(),
            destination_name: destination_name.into(),
            action: Some(action),
            description: String::new(),
            precedence: 0,
            meta: BTreeMap::new(),
            permissions: Vec::new(),
            hash: Vec::new(),
            raft_index: RaftIndex::default(),
        };
        ixn.refresh();
        ixn
    }

    /// Recompute precedence and content hash after a mutation
    pub fn refresh(&mut self) {
        self.precedence = precedence(
            &self.destination_namespace,
            &self.destination_name,
            &self.source_namespace,
            &self.source_name,
        );
        self.hash = self.compute_hash();
    }

    fn compute_hash(&self) -> Vec<u8> {
        let content = serde_json::json!({
            "id": self.id,
            "source": [self.source_namespace, self.source_name],
            "destination": [self.destination_namespace, self.destination_name],
            "action": self.action,
            "description": self.description,
            "meta": self.meta,
            "permissions": self.permissions,
        });
        hash_json(&content)
    }

    /// Destination this intention protects
    pub fn destination_key(&self) -> (String, String) {
        (
            self.destination_namespace.clone(),
            self.destination_name.clone(),
        )
    }

    /// Source block for the config entry of this intention's destination
    pub fn to_source(&self) -> IntentionSource {
        IntentionSource {
            name: self.source_name.clone(),
            namespace: self.source_namespace.clone(),
            action: self.action,
            permissions: self.permissions.clone(),
            precedence: self.precedence,
            description: self.description.clone(),
            legacy_id: self.id.clone(),
            legacy_meta: self.meta.clone(),
        }
    }
}

impl Replicable for Intention {
    type Key = String;

    const COMPARISON: Comparison = Comparison::HashOnly;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn content_hash(&self) -> &[u8] {
        &self.hash
    }

    fn modify_index(&self) -> u64 {
        self.raft_index.modify_index
    }

    fn estimated_size(&self) -> usize {
        let meta: usize = self.meta.iter().map(|(k, v)| k.len() + v.len()).sum();
        let perms: usize = self
            .permissions
            .iter()
            .map(|p| 16 + p.path_prefix.as_ref().map_or(0, String::len))
            .sum();
        128 + self.id.len()
            + self.source_namespace.len()
            + self.source_name.len()
            + self.destination_namespace.len()
            + self.destination_name.len()
            + self.description.len()
            + meta
            + perms
    }
}

/// One source inside a `service-intentions` config entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentionSource {
    pub name: String,
    pub namespace: String,
    pub action: Option<IntentionAction>,
    pub permissions: Vec<IntentionPermission>,
    pub precedence: i32,
    pub description: String,
    /// ID of the legacy row this source came from
    pub legacy_id: String,
    pub legacy_meta: BTreeMap<String, String>,
}

/// Every source intention for one destination service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIntentionsEntry {
    pub name: String,
    pub scope: EnterpriseScope,
    pub sources: Vec<IntentionSource>,
}

impl ServiceIntentionsEntry {
    /// Key the converted config entry will be stored under
    pub fn entry_key(&self) -> ConfigEntryKey {
        ConfigEntryKey {
            kind: ConfigEntryKind::ServiceIntentions,
            scope: self.scope.clone(),
            name: self.name.clone(),
        }
    }

    /// Fill defaults and order sources by descending precedence.
    ///
    /// Must stay deterministic: every server applies the result.
    pub fn legacy_normalize(&mut self) {
        if self.scope.namespace.is_empty() {
            self.scope.namespace = EnterpriseScope::DEFAULT.to_string();
        }
        if self.scope.partition.is_empty() {
            self.scope.partition = EnterpriseScope::DEFAULT.to_string();
        }

        for src in &mut self.sources {
            if src.namespace.is_empty() {
                src.namespace = self.scope.namespace.clone();
            }
            src.precedence =
                precedence(&self.scope.namespace, &self.name, &src.namespace, &src.name);
            for perm in &mut src.permissions {
                for method in &mut perm.methods {
                    *method = method.to_uppercase();
                }
            }
        }

        self.sources.sort_by(|a, b| b.precedence.cmp(&a.precedence));
    }

    /// Reject entries a legacy write could not have produced.
    pub fn legacy_validate(&self) -> Result<(), ReplicationError> {
        if self.name.is_empty() {
            return Err(ReplicationError::conversion("destination name is required"));
        }
        validate_wildcards(&self.scope.namespace, &self.name)?;

        if self.sources.is_empty() {
            return Err(ReplicationError::conversion(format!(
                "{}: at least one source is required",
                self.name
            )));
        }

        let mut seen = BTreeSet::new();
        for (i, src) in self.sources.iter().enumerate() {
            if src.name.is_empty() {
                return Err(ReplicationError::conversion(format!(
                    "{}: sources[{i}].name is required",
                    self.name
                )));
            }
            validate_wildcards(&src.namespace, &src.name)?;

            match (src.action, src.permissions.is_empty()) {
                (Some(_), false) => {
                    return Err(ReplicationError::conversion(format!(
                        "{}: sources[{i}] has both an action and permissions",
                        self.name
                    )))
                }
                (None, true) => {
                    return Err(ReplicationError::conversion(format!(
                        "{}: sources[{i}] needs an action or permissions",
                        self.name
                    )))
                }
                _ => {}
            }

            if !seen.insert((src.namespace.as_str(), src.name.as_str())) {
                return Err(ReplicationError::conversion(format!(
                    "{}: sources[{i}] duplicates source {}/{}",
                    self.name, src.namespace, src.name
                )));
            }
        }
        Ok(())
    }

    /// Encode as a `service-intentions` config entry
    pub fn into_config_entry(self) -> Result<ConfigEntry, ReplicationError> {
        let body = serde_json::to_value(&self.sources)
            .map_err(|e| ReplicationError::conversion(e.to_string()))?;
        Ok(ConfigEntry::new(
            ConfigEntryKind::ServiceIntentions,
            self.name,
            serde_json::json!({ "sources": body }),
        )
        .with_scope(self.scope))
    }
}

/// Group legacy intentions into one entry per destination, ordered by
/// scope then name.
pub fn migrate_intentions(intentions: &[Intention]) -> Vec<ServiceIntentionsEntry> {
    let mut collated: BTreeMap<(String, String), ServiceIntentionsEntry> = BTreeMap::new();
    for ixn in intentions {
        let (namespace, name) = ixn.destination_key();
        collated
            .entry((namespace.clone(), name.clone()))
            .or_insert_with(|| ServiceIntentionsEntry {
                name,
                scope: EnterpriseScope::in_namespace(namespace),
                sources: Vec::new(),
            })
            .sources
            .push(ixn.to_source());
    }
    collated.into_values().collect()
}

/// Higher values win. Exact names beat wildcards, destination first.
pub fn precedence(dst_namespace: &str, dst_name: &str, src_namespace: &str, src_name: &str) -> i32 {
    let max = match count_exact(dst_namespace, dst_name) {
        2 => 9,
        1 => 6,
        _ => 3,
    };
    max - (2 - count_exact(src_namespace, src_name))
}

fn count_exact(namespace: &str, name: &str) -> i32 {
    if namespace == WILDCARD {
        0
    } else if name == WILDCARD {
        1
    } else {
        2
    }
}

fn validate_wildcards(namespace: &str, name: &str) -> Result<(), ReplicationError> {
    if namespace == WILDCARD && name != WILDCARD {
        return Err(ReplicationError::conversion(format!(
            "wildcard namespace requires a wildcard name, got {namespace}/{name}"
        )));
    }
    Ok(())
}
