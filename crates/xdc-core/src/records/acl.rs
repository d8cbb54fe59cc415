//! ACL policies, roles and tokens together with their list stubs.
//!
//! The primary answers list queries with stubs (identity, hash, indices and a
//! few display fields). Full records are only requested for the IDs the diff
//! engine decides to upsert.

use super::Replicable;
use crate::index::RaftIndex;
use serde::{Deserialize, Serialize};

/// Value the primary substitutes for secrets the caller may not read.
pub const REDACTED_SECRET: &str = "<hidden>";

/// A full ACL policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclPolicy {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rules: String,
    pub datacenters: Vec<String>,
    pub hash: Vec<u8>,
    pub raft_index: RaftIndex,
}

/// List projection of an [`AclPolicy`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclPolicyStub {
    pub id: String,
    pub name: String,
    pub description: String,
    pub datacenters: Vec<String>,
    pub hash: Vec<u8>,
    pub create_index: u64,
    pub modify_index: u64,
}

impl AclPolicy {
    /// Project to the stub the primary returns from list queries
    pub fn stub(&self) -> AclPolicyStub {
        AclPolicyStub {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            datacenters: self.datacenters.clone(),
            hash: self.hash.clone(),
            create_index: self.raft_index.create_index,
            modify_index: self.raft_index.modify_index,
        }
    }
}

impl Replicable for AclPolicy {
    type Key = String;

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
        // 128 covers the fixed-width fields and encoding overhead
        let dcs: usize = self.datacenters.iter().map(String::len).sum();
        128 + self.id.len() + self.name.len() + self.description.len() + self.rules.len() + dcs
    }
}

impl Replicable for AclPolicyStub {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn content_hash(&self) -> &[u8] {
        &self.hash
    }

    fn modify_index(&self) -> u64 {
        self.modify_index
    }

    fn estimated_size(&self) -> usize {
        64 + self.id.len() + self.name.len() + self.description.len()
    }
}

/// A full ACL role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRole {
    pub id: String,
    pub name: String,
    pub description: String,
    /// IDs of the policies linked to the role
    pub policies: Vec<String>,
    pub hash: Vec<u8>,
    pub raft_index: RaftIndex,
}

/// List projection of an [`AclRole`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRoleStub {
    pub id: String,
    pub name: String,
    pub description: String,
    pub hash: Vec<u8>,
    pub create_index: u64,
    pub modify_index: u64,
}

impl AclRole {
    /// Project to the stub the primary returns from list queries
    pub fn stub(&self) -> AclRoleStub {
        AclRoleStub {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            hash: self.hash.clone(),
            create_index: self.raft_index.create_index,
            modify_index: self.raft_index.modify_index,
        }
    }
}

impl Replicable for AclRole {
    type Key = String;

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
        let links: usize = self.policies.iter().map(String::len).sum();
        128 + self.id.len() + self.name.len() + self.description.len() + links
    }
}

impl Replicable for AclRoleStub {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn content_hash(&self) -> &[u8] {
        &self.hash
    }

    fn modify_index(&self) -> u64 {
        self.modify_index
    }

    fn estimated_size(&self) -> usize {
        64 + self.id.len() + self.name.len() + self.description.len()
    }
}

/// A full ACL token.
///
/// Tokens created before accessor IDs existed carry an empty `accessor_id`
/// until the primary's leader assigns one lazily.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclToken {
    pub accessor_id: String,
    pub secret_id: String,
    pub description: String,
    pub policies: Vec<String>,
    pub roles: Vec<String>,
    /// Local tokens never leave their datacenter
    pub local: bool,
    pub hash: Vec<u8>,
    pub raft_index: RaftIndex,
}

/// List projection of an [`AclToken`] (never carries the secret).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclTokenStub {
    pub accessor_id: String,
    pub description: String,
    pub local: bool,
    pub hash: Vec<u8>,
    pub create_index: u64,
    pub modify_index: u64,
}

impl AclToken {
    /// Secret was replaced by the primary because the caller lacks acl:write
    pub fn is_redacted(&self) -> bool {
        self.secret_id == REDACTED_SECRET
    }

    /// Project to the stub the primary returns from list queries
    pub fn stub(&self) -> AclTokenStub {
        AclTokenStub {
            accessor_id: self.accessor_id.clone(),
            description: self.description.clone(),
            local: self.local,
            hash: self.hash.clone(),
            create_index: self.raft_index.create_index,
            modify_index: self.raft_index.modify_index,
        }
    }
}

impl Replicable for AclToken {
    type Key = String;

    fn key(&self) -> String {
        self.accessor_id.clone()
    }

    fn content_hash(&self) -> &[u8] {
        &self.hash
    }

    fn modify_index(&self) -> u64 {
        self.raft_index.modify_index
    }

    fn estimated_size(&self) -> usize {
        let links: usize = self
            .policies
            .iter()
            .chain(self.roles.iter())
            .map(String::len)
            .sum();
        128 + self.accessor_id.len() + self.secret_id.len() + self.description.len() + links
    }

    fn is_placeholder(&self) -> bool {
        self.accessor_id.is_empty()
    }
}

impl Replicable for AclTokenStub {
    type Key = String;

    fn key(&self) -> String {
        self.accessor_id.clone()
    }

    fn content_hash(&self) -> &[u8] {
        &self.hash
    }

    fn modify_index(&self) -> u64 {
        self.modify_index
    }

    fn estimated_size(&self) -> usize {
        64 + self.accessor_id.len() + self.description.len()
    }

    fn is_placeholder(&self) -> bool {
        self.accessor_id.is_empty()
    }
}
