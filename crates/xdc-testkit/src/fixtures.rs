//! Record factories with freshly generated identities and valid hashes.
//!
//! Records built here carry a content hash computed the same way for every
//! call, so two fixtures with identical content compare equal under the diff
//! engine. After mutating a record call [`Rehash::rehash`].

use serde_json::json;
use uuid::Uuid;
use xdc_core::records::{
    hash_json, AclPolicy, AclRole, AclToken, ConfigEntry, ConfigEntryKind, Intention,
    IntentionAction,
};

/// Recompute a record's content hash after a mutation.
pub trait Rehash {
    fn rehash(&mut self);
}

impl Rehash for AclPolicy {
    fn rehash(&mut self) {
        self.hash = hash_json(&json!({
            "name": self.name,
            "description": self.description,
            "rules": self.rules,
            "datacenters": self.datacenters,
        }));
    }
}

impl Rehash for AclRole {
    fn rehash(&mut self) {
        self.hash = hash_json(&json!({
            "name": self.name,
            "description": self.description,
            "policies": self.policies,
        }));
    }
}

impl Rehash for AclToken {
    fn rehash(&mut self) {
        self.hash = hash_json(&json!({
            "description": self.description,
            "policies": self.policies,
            "roles": self.roles,
            "local": self.local,
        }));
    }
}

impl Rehash for ConfigEntry {
    fn rehash(&mut self) {
        self.hash = hash_json(&self.body);
    }
}

impl Rehash for Intention {
    fn rehash(&mut self) {
        self.refresh();
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn rehashed<T: Rehash>(mut record: T) -> T {
    record.rehash();
    record
}

// =============================================================================
// ACL
// =============================================================================

pub fn policy(name: &str, rules: &str) -> AclPolicy {
    policy_with_id(&new_id(), name, rules)
}

pub fn policy_with_id(id: &str, name: &str, rules: &str) -> AclPolicy {
    rehashed(AclPolicy {
        id: id.to_string(),
        name: name.to_string(),
        rules: rules.to_string(),
        ..Default::default()
    })
}

pub fn role(name: &str, policy_ids: &[&str]) -> AclRole {
    rehashed(AclRole {
        id: new_id(),
        name: name.to_string(),
        policies: policy_ids.iter().map(|id| id.to_string()).collect(),
        ..Default::default()
    })
}

/// Global token linked to `policy_ids`
pub fn token(description: &str, policy_ids: &[&str]) -> AclToken {
    rehashed(AclToken {
        accessor_id: new_id(),
        secret_id: new_id(),
        description: description.to_string(),
        policies: policy_ids.iter().map(|id| id.to_string()).collect(),
        ..Default::default()
    })
}

pub fn local_token(description: &str) -> AclToken {
    let mut token = token(description, &[]);
    token.local = true;
    rehashed(token)
}

/// Token created before accessor IDs existed
pub fn unkeyed_token(description: &str) -> AclToken {
    let mut token = token(description, &[]);
    token.accessor_id.clear();
    token
}

// =============================================================================
// Config entries and intentions
// =============================================================================

pub fn config_entry(kind: ConfigEntryKind, name: &str, body: serde_json::Value) -> ConfigEntry {
    ConfigEntry::new(kind, name, body)
}

pub fn service_defaults(name: &str, protocol: &str) -> ConfigEntry {
    ConfigEntry::new(
        ConfigEntryKind::ServiceDefaults,
        name,
        json!({ "protocol": protocol }),
    )
}

pub fn legacy_intention(source: &str, destination: &str, action: IntentionAction) -> Intention {
    Intention::new(new_id(), source, destination, action)
}

pub fn allow(source: &str, destination: &str) -> Intention {
    legacy_intention(source, destination, IntentionAction::Allow)
}

pub fn deny(source: &str, destination: &str) -> Intention {
    legacy_intention(source, destination, IntentionAction::Deny)
}
