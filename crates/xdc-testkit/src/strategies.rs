//! Property test strategies for replicated record sets.
//!
//! Identities are drawn from small pools so that independently generated
//! local and remote sets overlap, which is where the interesting diffs are.

use proptest::prelude::*;

// Re-export proptest for convenience
pub use proptest;

use crate::fixtures;
use xdc_core::records::{AclPolicy, ConfigEntry, ConfigEntryKind, Intention, IntentionAction};

const SERVICES: &[&str] = &["web", "api", "db", "cache", "billing", "*"];

const KINDS: &[ConfigEntryKind] = &[
    ConfigEntryKind::ServiceDefaults,
    ConfigEntryKind::ServiceResolver,
    ConfigEntryKind::ProxyDefaults,
    ConfigEntryKind::Mesh,
];

/// Policies with IDs from `policy-0..policy-23` and one of four rule sets.
///
/// ```rust
/// use xdc_testkit::strategies::arb_policy_set;
/// use proptest::prelude::*;
///
/// proptest! {
///     #[test]
///     fn ids_are_unique(policies in arb_policy_set(8)) {
///         let mut ids: Vec<_> = policies.iter().map(|p| p.id.clone()).collect();
///         ids.dedup();
///         prop_assert_eq!(ids.len(), policies.len());
///     }
/// }
/// ```
pub fn arb_policy_set(max: usize) -> impl Strategy<Value = Vec<AclPolicy>> {
    prop::collection::btree_map(0u8..24, 0u8..4, 0..=max).prop_map(|picked| {
        picked
            .into_iter()
            .map(|(id, rules)| {
                let id = format!("policy-{id}");
                fixtures::policy_with_id(&id, &id, &format!("key_prefix \"{rules}\" {{}}"))
            })
            .collect()
    })
}

/// Config entries keyed by kind and service name with a varying body.
pub fn arb_config_entry_set(max: usize) -> impl Strategy<Value = Vec<ConfigEntry>> {
    let key = (0..KINDS.len(), 0..SERVICES.len() - 1);
    prop::collection::btree_map(key, 0u8..3, 0..=max).prop_map(|picked| {
        picked
            .into_iter()
            .map(|((kind, service), version)| {
                fixtures::config_entry(
                    KINDS[kind],
                    SERVICES[service],
                    serde_json::json!({ "version": version }),
                )
            })
            .collect()
    })
}

/// Legacy intentions with distinct source and destination pairs.
///
/// IDs are derived from the pair, so regenerating the same pair yields the
/// same row.
pub fn arb_legacy_intentions(max: usize) -> impl Strategy<Value = Vec<Intention>> {
    let pair = (0..SERVICES.len(), 0..SERVICES.len() - 1);
    prop::collection::btree_map(pair, any::<bool>(), 0..=max).prop_map(|picked| {
        picked
            .into_iter()
            .map(|((src, dst), allow)| {
                let action = if allow {
                    IntentionAction::Allow
                } else {
                    IntentionAction::Deny
                };
                let id = format!("ixn-{src}-{dst}");
                Intention::new(id, SERVICES[src], SERVICES[dst], action)
            })
            .collect()
    })
}
