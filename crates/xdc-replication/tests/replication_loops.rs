//! Long-running replication loops: cursors, status, backoff and shutdown.

use std::sync::Arc;
use std::time::Duration;
use xdc_core::{ReplicationConfig, RetryPolicy, RpcError};
use xdc_replication::replicator::{PolicyReplication, RoleReplication};
use xdc_replication::{CancellationSource, ReplicationCursor, Replicator, StatusTracker};
use xdc_testkit::{fixtures, wait_until, Harness};

struct RunningLoop {
    source: CancellationSource,
    handle: tokio::task::JoinHandle<()>,
    cursor: ReplicationCursor,
    status: Arc<StatusTracker>,
}

impl RunningLoop {
    async fn stop(self) {
        self.source.cancel();
        tokio::time::timeout(Duration::from_secs(1), self.handle)
            .await
            .expect("replicator should exit promptly")
            .unwrap();
    }
}

fn spawn_policy_loop(
    h: &Harness,
    cursor: ReplicationCursor,
    config: ReplicationConfig,
) -> RunningLoop {
    let status = Arc::new(StatusTracker::new());
    let replicator = Replicator::new(
        PolicyReplication::new(h.collaborators()),
        cursor.clone(),
        h.collaborators(),
        status.clone(),
        Arc::new(config),
    );
    let source = CancellationSource::new();
    let token = source.token();
    let handle = tokio::spawn(async move {
        replicator.run(token).await.unwrap();
    });
    RunningLoop {
        source,
        handle,
        cursor,
        status,
    }
}

#[tokio::test(start_paused = true)]
async fn loop_follows_primary_changes() {
    let h = Harness::new();
    h.primary
        .upsert_policy(fixtures::policy_with_id("p-a", "a", "acl = \"read\""));
    let running = spawn_policy_loop(
        &h,
        ReplicationCursor::new(),
        ReplicationConfig::for_testing(),
    );

    assert!(wait_until(Duration::from_secs(5), || h.store.policy_ids().len() == 1).await);
    assert!(
        wait_until(Duration::from_secs(5), || {
            running.cursor.get() == h.primary.index()
        })
        .await
    );
    assert_eq!(running.status.snapshot().replicated_index, h.primary.index());

    // the in-flight blocking query wakes on the next write
    h.primary
        .upsert_policy(fixtures::policy_with_id("p-b", "b", "acl = \"read\""));
    h.primary.delete_policy("p-a");
    assert!(
        wait_until(Duration::from_secs(5), || {
            h.store.policy_ids() == vec!["p-b".to_string()]
        })
        .await
    );

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failure_resets_cursor_and_records_error() {
    let h = Harness::new();
    h.primary
        .upsert_policy(fixtures::policy_with_id("p-a", "a", "acl = \"read\""));
    h.primary.fail_next(1, RpcError::unreachable("no route to dc1"));

    let cursor = ReplicationCursor::new();
    cursor.set(50);
    let running = spawn_policy_loop(&h, cursor, ReplicationConfig::for_testing());

    assert!(wait_until(Duration::from_secs(5), || h.store.policy_ids().len() == 1).await);

    let queries = h.primary.queries();
    assert_eq!(queries[0].0, "ACL.PolicyList");
    assert_eq!(queries[0].1.min_query_index, 50);
    assert_eq!(queries[1].1.min_query_index, 0);
    assert!(queries[1].1.allow_stale);

    let status = running.status.snapshot();
    assert!(status.last_error.is_some());
    assert!(status.last_error_message.contains("no route to dc1"));

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn passes_wait_for_a_replication_token() {
    let h = Harness::new();
    h.credentials.set(None);
    h.primary
        .upsert_policy(fixtures::policy_with_id("p-a", "a", "acl = \"read\""));
    let running = spawn_policy_loop(
        &h,
        ReplicationCursor::new(),
        ReplicationConfig::for_testing(),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.primary.queries().is_empty());

    h.credentials.set(Some("rotated-token"));
    assert!(wait_until(Duration::from_secs(5), || h.store.policy_ids().len() == 1).await);
    assert!(h
        .primary
        .queries()
        .iter()
        .all(|(_, opts)| opts.token == "rotated-token" && opts.datacenter == "dc1"));

    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancellation_cuts_backoff_short() {
    let h = Harness::new();
    h.primary.fail_next(1, RpcError::unreachable("no route to dc1"));
    let config = ReplicationConfig {
        replication_backoff: RetryPolicy::fixed(Duration::from_secs(600)),
        ..ReplicationConfig::for_testing()
    };
    let running = spawn_policy_loop(&h, ReplicationCursor::new(), config);

    assert!(wait_until(Duration::from_secs(5), || h.primary.queries().len() == 1).await);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.primary.queries().len(), 1);

    running.stop().await;
    assert_eq!(h.primary.queries().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn kinds_replicate_independently() {
    let h = Harness::new();
    let policy = fixtures::policy_with_id("p-a", "a", "acl = \"read\"");
    h.primary.upsert_policy(policy);
    h.primary.upsert_role(fixtures::role("ops", &["p-a"]));
    h.store.reject("ACLPolicySet");

    let status = Arc::new(StatusTracker::new());
    let source = CancellationSource::new();
    let roles = Replicator::new(
        RoleReplication::new(h.collaborators()),
        ReplicationCursor::new(),
        h.collaborators(),
        status.clone(),
        Arc::new(ReplicationConfig::for_testing()),
    );
    let policies = Replicator::new(
        PolicyReplication::new(h.collaborators()),
        ReplicationCursor::new(),
        h.collaborators(),
        status.clone(),
        Arc::new(ReplicationConfig::for_testing()),
    );
    let role_task = tokio::spawn(roles.run(source.token()));
    let policy_task = tokio::spawn(policies.run(source.token()));

    // policy commits keep failing while roles still converge
    assert!(wait_until(Duration::from_secs(5), || h.store.role_ids().len() == 1).await);
    assert!(h.store.policy_ids().is_empty());
    assert!(wait_until(Duration::from_secs(5), || {
        status.snapshot().last_error_message.contains("policies")
    })
    .await);
    assert!(status.snapshot().replicated_role_index > 0);

    source.cancel();
    role_task.await.unwrap().unwrap();
    policy_task.await.unwrap().unwrap();
}
