//! Single replication passes against the in-memory primary and store.

use assert_matches::assert_matches;
use std::sync::Arc;
use std::time::Duration;
use xdc_core::records::ConfigEntryKind;
use xdc_core::{CommitRequest, ConfigEntryOp, ReplicationConfig, ReplicationError, RpcError};
use xdc_replication::replicator::{ConfigEntryReplication, PolicyReplication, TokenReplication};
use xdc_replication::{
    CancellationSource, CancellationToken, LocalState, PassOutcome, ReplicationCursor,
    ReplicationDelegate, Replicator, StatusTracker,
};
use xdc_testkit::{fixtures, Harness, TEST_REPLICATION_TOKEN};

fn replicator<D: ReplicationDelegate>(
    harness: &Harness,
    delegate: D,
    config: ReplicationConfig,
) -> Replicator<D> {
    Replicator::new(
        delegate,
        ReplicationCursor::new(),
        harness.collaborators(),
        Arc::new(StatusTracker::new()),
        Arc::new(config),
    )
}

fn policy_replicator(harness: &Harness) -> Replicator<PolicyReplication> {
    let delegate = PolicyReplication::new(harness.collaborators());
    replicator(harness, delegate, ReplicationConfig::for_testing())
}

#[tokio::test(start_paused = true)]
async fn policies_converge_with_deletions_first() {
    let h = Harness::new();
    h.store
        .seed_policy(fixtures::policy_with_id("p-a", "a", "acl = \"read\""));
    h.store
        .seed_policy(fixtures::policy_with_id("p-b", "b", "acl = \"read\""));
    h.primary
        .upsert_policy(fixtures::policy_with_id("p-a", "a", "acl = \"write\""));
    h.primary
        .upsert_policy(fixtures::policy_with_id("p-c", "c", "operator = \"read\""));

    let outcome = policy_replicator(&h)
        .replicate_once(&CancellationToken::never(), 0, TEST_REPLICATION_TOKEN)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        PassOutcome::Replicated {
            index: h.primary.index(),
            deletions: 1,
            upserts: 2,
        }
    );
    assert_eq!(h.store.policy_ids(), vec!["p-a".to_string(), "p-c".to_string()]);
    assert_eq!(h.store.policy("p-a").unwrap().rules, "acl = \"write\"");
    assert_eq!(h.store.commit_types(), vec!["ACLPolicyDelete", "ACLPolicySet"]);
}

#[tokio::test(start_paused = true)]
async fn unchanged_primary_commits_nothing() {
    let h = Harness::new();
    h.primary
        .upsert_policy(fixtures::policy_with_id("p-a", "a", "acl = \"read\""));
    let replicator = policy_replicator(&h);
    let never = CancellationToken::never();

    let first = replicator
        .replicate_once(&never, 0, TEST_REPLICATION_TOKEN)
        .await
        .unwrap();
    let PassOutcome::Replicated { index, .. } = first else {
        panic!("first pass should replicate, got {first:?}");
    };
    let commits = h.store.commit_count("ACLPolicySet");

    // blocks until the fake primary's query timeout elapses
    let second = replicator
        .replicate_once(&never, index, TEST_REPLICATION_TOKEN)
        .await
        .unwrap();
    assert_eq!(
        second,
        PassOutcome::Replicated {
            index,
            deletions: 0,
            upserts: 0,
        }
    );
    assert_eq!(h.store.commit_count("ACLPolicySet"), commits);
}

#[tokio::test(start_paused = true)]
async fn remote_index_regression_forces_full_sync() {
    let h = Harness::new();
    h.store
        .seed_policy(fixtures::policy_with_id("p-a", "a", "acl = \"read\""));
    h.primary
        .upsert_policy(fixtures::policy_with_id("p-a", "a", "acl = \"deny\""));

    // a cursor far past the rebuilt primary would otherwise hide the change
    let outcome = policy_replicator(&h)
        .replicate_once(&CancellationToken::never(), 1_000, TEST_REPLICATION_TOKEN)
        .await
        .unwrap();

    assert_matches!(outcome, PassOutcome::Replicated { upserts: 1, .. });
    assert_eq!(h.store.policy("p-a").unwrap().rules, "acl = \"deny\"");
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_blocking_fetch() {
    let h = Harness::new();
    h.primary
        .upsert_policy(fixtures::policy_with_id("p-a", "a", "acl = \"read\""));
    let replicator = policy_replicator(&h);
    let source = CancellationSource::new();
    let token = source.token();

    let (outcome, _) = tokio::join!(
        replicator.replicate_once(&token, h.primary.index(), TEST_REPLICATION_TOKEN),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            source.cancel();
        }
    );

    assert_eq!(outcome.unwrap(), PassOutcome::Cancelled);
    assert!(h.store.commits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn fetch_failure_is_reported_per_kind() {
    let h = Harness::new();
    h.primary.fail_next(1, RpcError::unreachable("no route to dc1"));

    let err = policy_replicator(&h)
        .replicate_once(&CancellationToken::never(), 0, TEST_REPLICATION_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(err, ReplicationError::Fetch { noun: "policies", .. });
    assert!(err.to_string().contains("no route to dc1"));
}

#[tokio::test(start_paused = true)]
async fn rejected_commits_fail_the_pass_after_trying_all() {
    let h = Harness::new();
    h.store
        .seed_policy(fixtures::policy_with_id("p-old", "old", "acl = \"read\""));
    h.primary
        .upsert_policy(fixtures::policy_with_id("p-new", "new", "acl = \"read\""));
    h.store.reject("ACLPolicySet");

    let err = policy_replicator(&h)
        .replicate_once(&CancellationToken::never(), 0, TEST_REPLICATION_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(err, ReplicationError::Apply { noun: "policies", .. });
    assert_eq!(h.store.policy_ids(), Vec::<String>::new());
    assert_eq!(h.store.commit_types(), vec!["ACLPolicyDelete"]);
}

#[tokio::test(start_paused = true)]
async fn deletions_are_batched_and_rate_limited() {
    let h = Harness::new();
    for i in 0..40 {
        let id = format!("p-{i:02}");
        h.store.seed_policy(fixtures::policy_with_id(&id, &id, ""));
    }
    let config = ReplicationConfig {
        apply_limit: 10,
        ..ReplicationConfig::for_testing()
    };
    let delegate = PolicyReplication::new(h.collaborators());

    replicator(&h, delegate, config)
        .replicate_once(&CancellationToken::never(), 0, TEST_REPLICATION_TOKEN)
        .await
        .unwrap();

    let commits = h.store.commits();
    let sizes: Vec<usize> = commits
        .iter()
        .map(|c| match &c.request {
            CommitRequest::AclPolicyDelete(ids) => ids.len(),
            other => panic!("unexpected commit {other:?}"),
        })
        .collect();
    assert_eq!(sizes, vec![16, 16, 8]);
    for pair in commits.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(100));
    }
    assert!(h.store.policy_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn redacted_token_secrets_abort_replication() {
    let h = Harness::new();
    h.primary.upsert_token(fixtures::token("ci", &[]));
    h.primary.set_redact_secrets(true);
    let delegate = TokenReplication::new(h.collaborators());

    let err = replicator(&h, delegate, ReplicationConfig::for_testing())
        .replicate_once(&CancellationToken::never(), 0, TEST_REPLICATION_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(err, ReplicationError::RedactedData { noun: "token" });
    assert_eq!(h.store.commit_count("ACLTokenSet"), 0);
}

#[tokio::test(start_paused = true)]
async fn redacted_tokens_fail_before_anything_is_deleted() {
    let h = Harness::new();
    let stale = fixtures::token("retired", &[]);
    h.store.seed_token(stale.clone());
    h.primary.upsert_token(fixtures::token("ci", &[]));
    h.primary.set_redact_secrets(true);
    let delegate = TokenReplication::new(h.collaborators());

    let err = replicator(&h, delegate, ReplicationConfig::for_testing())
        .replicate_once(&CancellationToken::never(), 0, TEST_REPLICATION_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(err, ReplicationError::RedactedData { noun: "token" });
    assert!(h.store.commits().is_empty());
    assert!(h.store.token(&stale.accessor_id).is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_record_reads_leave_local_state_untouched() {
    let h = Harness::new();
    h.store
        .seed_policy(fixtures::policy_with_id("p-old", "old", "acl = \"read\""));
    h.primary
        .upsert_policy(fixtures::policy_with_id("p-new", "new", "acl = \"read\""));
    let replicator = policy_replicator(&h);

    // the listing succeeds, the follow-up read of the full record does not
    h.primary
        .fail_next_call("ACL.PolicyBatchRead", RpcError::unreachable("connection reset"));

    let err = replicator
        .replicate_once(&CancellationToken::never(), 0, TEST_REPLICATION_TOKEN)
        .await
        .unwrap_err();
    assert_matches!(err, ReplicationError::Fetch { noun: "policies", .. });
    assert_eq!(h.store.policy_ids(), vec!["p-old".to_string()]);
    assert!(h.store.commits().is_empty());

    replicator
        .replicate_once(&CancellationToken::never(), 0, TEST_REPLICATION_TOKEN)
        .await
        .unwrap();
    assert_eq!(h.store.policy_ids(), vec!["p-new".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn local_and_unkeyed_tokens_are_left_alone() {
    let h = Harness::new();
    let local_only = fixtures::local_token("agent");
    h.store.seed_token(local_only.clone());

    let global = fixtures::token("ci", &[]);
    h.primary.upsert_token(global.clone());
    h.primary.upsert_token(fixtures::unkeyed_token("legacy"));
    h.primary.upsert_token(fixtures::local_token("primary agent"));
    let delegate = TokenReplication::new(h.collaborators());

    let outcome = replicator(&h, delegate, ReplicationConfig::for_testing())
        .replicate_once(&CancellationToken::never(), 0, TEST_REPLICATION_TOKEN)
        .await
        .unwrap();

    assert_matches!(
        outcome,
        PassOutcome::Replicated {
            deletions: 0,
            upserts: 1,
            ..
        }
    );
    let mut expected = vec![global.accessor_id.clone(), local_only.accessor_id.clone()];
    expected.sort();
    assert_eq!(h.store.token_ids(), expected);
    assert_eq!(h.store.token(&global.accessor_id).unwrap().secret_id, global.secret_id);
}

#[tokio::test(start_paused = true)]
async fn config_entries_apply_one_commit_per_entry() {
    let h = Harness::new();
    h.store.seed_config_entry(fixtures::service_defaults("web", "http"));
    h.store.seed_config_entry(fixtures::service_defaults("legacy", "tcp"));
    h.primary
        .upsert_config_entry(fixtures::service_defaults("web", "grpc"));
    h.primary.upsert_config_entry(fixtures::config_entry(
        ConfigEntryKind::ProxyDefaults,
        "global",
        serde_json::json!({ "mode": "transparent" }),
    ));
    let delegate = ConfigEntryReplication::new(h.collaborators());

    let outcome = replicator(&h, delegate, ReplicationConfig::for_testing())
        .replicate_once(&CancellationToken::never(), 0, TEST_REPLICATION_TOKEN)
        .await
        .unwrap();

    assert_matches!(
        outcome,
        PassOutcome::Replicated {
            deletions: 1,
            upserts: 2,
            ..
        }
    );
    let ops: Vec<(ConfigEntryOp, String)> = h
        .store
        .commits()
        .into_iter()
        .map(|c| match c.request {
            CommitRequest::ConfigEntry { op, entry } => (op, entry.name),
            other => panic!("unexpected commit {other:?}"),
        })
        .collect();
    assert_eq!(ops[0], (ConfigEntryOp::Delete, "legacy".to_string()));
    assert_eq!(ops.len(), 3);
    assert!(ops[1..].iter().all(|(op, _)| *op == ConfigEntryOp::Upsert));

    let web = h
        .store
        .config_entry(&fixtures::service_defaults("web", "grpc").entry_key())
        .unwrap()
        .unwrap();
    assert_eq!(web.body["protocol"], "grpc");
}
