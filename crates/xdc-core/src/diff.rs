//! Two-pointer diff between a local snapshot and the primary's snapshot.
//!
//! Both sides are sorted by [`Replicable::key`] and merged in a single pass:
//!
//! - key only on the local side: delete it
//! - key only on the remote side: upsert it
//! - key on both sides: upsert when the record is stale according to the
//!   remote kind's [`Comparison`]
//!
//! Placeholder records (tokens still waiting for an accessor ID) are never
//! touched and are only counted.

use crate::records::{Comparison, Replicable};

/// Outcome of diffing one resource kind.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult<R: Replicable> {
    /// Keys present locally that the primary no longer has
    pub deletions: Vec<R::Key>,
    /// Remote records to write locally, in key order
    pub upserts: Vec<R>,
    /// Local placeholders left alone
    pub local_skipped: usize,
    /// Remote placeholders left alone
    pub remote_skipped: usize,
}

impl<R: Replicable> Default for DiffResult<R> {
    fn default() -> Self {
        Self {
            deletions: Vec::new(),
            upserts: Vec::new(),
            local_skipped: 0,
            remote_skipped: 0,
        }
    }
}

impl<R: Replicable> DiffResult<R> {
    /// Nothing to delete or upsert
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.upserts.is_empty()
    }

    /// Keys of the records to upsert
    pub fn upsert_keys(&self) -> Vec<R::Key> {
        self.upserts.iter().map(Replicable::key).collect()
    }
}

/// Compute the minimal set of deletions and upserts that converges `local`
/// to `remote`.
///
/// `last_remote_index` is the index of the previous successful pass. For
/// [`Comparison::IndexAndHash`] kinds a record present on both sides is only
/// rewritten when it changed after that index and its hash differs.
pub fn diff<L, R>(local: &[L], remote: &[R], last_remote_index: u64) -> DiffResult<R>
where
    L: Replicable<Key = R::Key>,
    R: Replicable,
{
    let mut result = DiffResult::default();

    let local = sorted_by_key(local, &mut result.local_skipped);
    let remote = sorted_by_key(remote, &mut result.remote_skipped);

    let (mut l, mut r) = (0, 0);
    while l < local.len() && r < remote.len() {
        let (local_key, local_rec) = &local[l];
        let (remote_key, remote_rec) = &remote[r];

        match local_key.cmp(remote_key) {
            std::cmp::Ordering::Equal => {
                if is_stale(*local_rec, *remote_rec, last_remote_index) {
                    result.upserts.push((*remote_rec).clone());
                }
                l += 1;
                r += 1;
            }
            std::cmp::Ordering::Less => {
                result.deletions.push(local_key.clone());
                l += 1;
            }
            std::cmp::Ordering::Greater => {
                result.upserts.push((*remote_rec).clone());
                r += 1;
            }
        }
    }

    result.deletions.extend(local[l..].iter().map(|(key, _)| key.clone()));
    result.upserts.extend(remote[r..].iter().map(|(_, rec)| (*rec).clone()));

    result
}

fn sorted_by_key<'a, T: Replicable>(
    records: &'a [T],
    skipped: &mut usize,
) -> Vec<(T::Key, &'a T)> {
    let mut keyed: Vec<(T::Key, &T)> = records
        .iter()
        .filter(|rec| {
            if rec.is_placeholder() {
                *skipped += 1;
                false
            } else {
                true
            }
        })
        .map(|rec| (rec.key(), rec))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed
}

fn is_stale<L, R>(local: &L, remote: &R, last_remote_index: u64) -> bool
where
    L: Replicable,
    R: Replicable,
{
    let changed = local.content_hash() != remote.content_hash();
    match R::COMPARISON {
        Comparison::IndexAndHash => remote.modify_index() > last_remote_index && changed,
        Comparison::HashOnly => changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::RaftIndex;
    use crate::records::{AclPolicyStub, AclTokenStub, Intention, IntentionAction};

    fn policy(id: &str, hash: &str, modify_index: u64) -> AclPolicyStub {
        AclPolicyStub {
            id: id.to_string(),
            hash: hash.as_bytes().to_vec(),
            create_index: 1,
            modify_index,
            ..Default::default()
        }
    }

    #[test]
    fn empty_inputs_produce_empty_diff() {
        let result = diff::<AclPolicyStub, AclPolicyStub>(&[], &[], 0);
        assert!(result.is_empty());
    }

    #[test]
    fn unsorted_inputs_are_merged_by_key() {
        let local = vec![policy("c", "x", 1), policy("a", "x", 1)];
        let remote = vec![policy("b", "x", 2), policy("a", "x", 1)];

        let result = diff(&local, &remote, 0);

        assert_eq!(result.deletions, vec!["c".to_string()]);
        assert_eq!(result.upsert_keys(), vec!["b".to_string()]);
    }

    #[test]
    fn changed_hash_at_old_index_is_ignored() {
        let local = vec![policy("a", "old", 5)];
        let remote = vec![policy("a", "new", 5)];

        assert!(diff(&local, &remote, 10).is_empty());
        assert_eq!(diff(&local, &remote, 4).upsert_keys(), vec!["a".to_string()]);
    }

    #[test]
    fn placeholders_are_counted_not_touched() {
        let local = vec![AclTokenStub::default()];
        let remote = vec![AclTokenStub {
            accessor_id: "t1".to_string(),
            modify_index: 3,
            ..Default::default()
        }];

        let result = diff(&local, &remote, 0);

        assert_eq!(result.local_skipped, 1);
        assert_eq!(result.remote_skipped, 0);
        assert!(result.deletions.is_empty());
        assert_eq!(result.upserts.len(), 1);
    }

    #[test]
    fn hash_only_kinds_ignore_cursor() {
        let local = vec![Intention::new("i1", "api", "web", IntentionAction::Allow)];
        let mut changed = local[0].clone();
        changed.action = Some(IntentionAction::Deny);
        changed.raft_index = RaftIndex::new(1, 1);
        changed.refresh();

        let result = diff(&local, &[changed], 100);
        assert_eq!(result.upserts.len(), 1);
    }
}
