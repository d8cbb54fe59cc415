//! Consensus-log indices and blocking query options.

use serde::{Deserialize, Serialize};

/// Indices assigned by the local consensus log when a record is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RaftIndex {
    /// Index of the write that created the record
    pub create_index: u64,
    /// Index of the most recent write touching the record
    pub modify_index: u64,
}

impl RaftIndex {
    /// Build an index pair
    pub fn new(create_index: u64, modify_index: u64) -> Self {
        Self {
            create_index,
            modify_index,
        }
    }
}

/// Options attached to every read sent to the primary datacenter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Datacenter the request is routed to
    pub datacenter: String,
    /// Block until the remote index moves past this value (0 = don't block)
    pub min_query_index: u64,
    /// Allow any server, not just the leader, to answer
    pub allow_stale: bool,
    /// Credential used for the request
    pub token: String,
}

impl QueryOptions {
    /// A stale-allowed blocking query against `datacenter`
    pub fn blocking(
        datacenter: impl Into<String>,
        min_query_index: u64,
        token: impl Into<String>,
    ) -> Self {
        Self {
            datacenter: datacenter.into(),
            min_query_index,
            allow_stale: true,
            token: token.into(),
        }
    }

    /// A non-blocking read against `datacenter`
    pub fn immediate(datacenter: impl Into<String>, token: impl Into<String>) -> Self {
        Self::blocking(datacenter, 0, token)
    }
}

/// A result set together with the index it was served at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indexed<T> {
    /// Raft index the remote state was read at
    pub index: u64,
    /// Payload
    pub items: T,
}

impl<T> Indexed<T> {
    /// Wrap a payload
    pub fn new(index: u64, items: T) -> Self {
        Self { index, items }
    }
}

/// Next index to block on, resetting to zero if the remote went backwards.
pub fn next_index_val(prev: u64, idx: u64) -> u64 {
    if prev > idx {
        0
    } else {
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_index_resets_on_regression() {
        assert_eq!(next_index_val(0, 10), 10);
        assert_eq!(next_index_val(10, 10), 10);
        assert_eq!(next_index_val(10, 12), 12);
        assert_eq!(next_index_val(12, 3), 0);
    }

    #[test]
    fn blocking_options_allow_stale() {
        let opts = QueryOptions::blocking("dc1", 42, "secret");
        assert!(opts.allow_stale);
        assert_eq!(opts.min_query_index, 42);
        assert_eq!(QueryOptions::immediate("dc1", "secret").min_query_index, 0);
    }
}
