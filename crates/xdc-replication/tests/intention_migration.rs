//! Legacy intention migration in the primary and secondary datacenters.

use std::sync::Arc;
use std::time::Duration;
use xdc_core::migration::{INTENTION_FORMAT_CONFIG_ENTRY, INTENTION_FORMAT_KEY};
use xdc_core::records::{ConfigEntryKey, ConfigEntryKind, DataOrigin, EnterpriseScope};
use xdc_core::{CommitRequest, MigrationPhase, MigrationState, ReplicationConfig};
use xdc_replication::migration::convert_legacy_intentions;
use xdc_replication::{
    CancellationToken, IntentionFormat, LocalState, LoopControl, PrimaryMigration,
    ReplicationCursor, SecondaryMigration, MIGRATION_ROUTINE_NAME,
};
use xdc_testkit::{fixtures, wait_until, Harness};

fn primary_config() -> ReplicationConfig {
    ReplicationConfig {
        datacenter: "dc1".to_string(),
        ..ReplicationConfig::for_testing()
    }
}

fn intentions_key(destination: &str) -> ConfigEntryKey {
    ConfigEntryKey {
        kind: ConfigEntryKind::ServiceIntentions,
        scope: EnterpriseScope::default(),
        name: destination.to_string(),
    }
}

fn position(types: &[&str], wanted: &str) -> usize {
    types
        .iter()
        .position(|t| *t == wanted)
        .unwrap_or_else(|| panic!("no {wanted} commit in {types:?}"))
}

// =============================================================================
// Primary
// =============================================================================

#[tokio::test(start_paused = true)]
async fn primary_converts_legacy_intentions() {
    let h = Harness::new();
    h.features.set(true);
    h.store.seed_legacy_intention(fixtures::allow("web", "db"));
    h.store.seed_legacy_intention(fixtures::deny("*", "db"));
    h.store.seed_legacy_intention(fixtures::allow("web", "cache"));
    let engine = h.engine(primary_config()).unwrap();

    engine.establish_leadership().await.unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.migration_complete()).await);
    assert!(
        wait_until(Duration::from_secs(5), || {
            !engine.is_routine_running(MIGRATION_ROUTINE_NAME)
        })
        .await
    );

    assert_eq!(
        h.store.config_entry_keys(),
        vec![intentions_key("cache"), intentions_key("db")]
    );
    let db = h.store.config_entry(&intentions_key("db")).unwrap().unwrap();
    let sources = db.body["sources"].as_array().unwrap();
    // exact source names outrank wildcards
    assert_eq!(sources[0]["name"], "web");
    assert_eq!(sources[1]["name"], "*");

    assert!(h.store.legacy_intention_ids().is_empty());
    assert_eq!(
        h.store.metadata(INTENTION_FORMAT_KEY).as_deref(),
        Some(INTENTION_FORMAT_CONFIG_ENTRY)
    );
    assert_eq!(h.store.commit_count("SystemMetadataSet"), 1);
    let types = h.store.commit_types();
    assert!(position(&types, "ConfigEntry") < position(&types, "IntentionDeleteAll"));

    engine.revoke_leadership().await;
}

#[tokio::test(start_paused = true)]
async fn primary_waits_for_every_server_to_upgrade() {
    let h = Harness::new();
    h.store.seed_legacy_intention(fixtures::allow("web", "db"));
    let engine = h.engine(primary_config()).unwrap();

    engine.establish_leadership().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(engine.is_routine_running(MIGRATION_ROUTINE_NAME));
    assert!(h.store.commits().is_empty());
    assert!(!engine.migration_complete());

    h.features.set(true);
    assert!(wait_until(Duration::from_secs(5), || engine.migration_complete()).await);
    assert_eq!(h.store.config_entry_keys(), vec![intentions_key("db")]);

    engine.revoke_leadership().await;
}

#[tokio::test(start_paused = true)]
async fn primary_keeps_natively_written_entries() {
    let h = Harness::new();
    h.features.set(true);
    let native = fixtures::config_entry(
        ConfigEntryKind::ServiceIntentions,
        "db",
        serde_json::json!({ "sources": [{ "name": "api", "action": "allow" }] }),
    );
    h.store.seed_config_entry(native.clone());
    h.store.seed_legacy_intention(fixtures::allow("web", "db"));
    h.store.seed_legacy_intention(fixtures::allow("web", "cache"));
    let migration = PrimaryMigration::new(
        h.collaborators(),
        Arc::new(IntentionFormat::new(h.features.clone())),
        Arc::new(primary_config()),
    );

    let control = migration
        .migrate_once(&CancellationToken::never())
        .await
        .unwrap();

    assert_eq!(control, LoopControl::Done);
    let db = h.store.config_entry(&intentions_key("db")).unwrap().unwrap();
    assert_eq!(db.body, native.body);
    assert!(h
        .store
        .config_entry(&intentions_key("cache"))
        .unwrap()
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn primary_pass_is_a_no_op_while_incompatible() {
    let h = Harness::new();
    h.store.seed_legacy_intention(fixtures::allow("web", "db"));
    let migration = PrimaryMigration::new(
        h.collaborators(),
        Arc::new(IntentionFormat::new(h.features.clone())),
        Arc::new(primary_config()),
    );

    let control = migration
        .migrate_once(&CancellationToken::never())
        .await
        .unwrap();

    assert_eq!(control, LoopControl::Continue);
    assert!(h.store.commits().is_empty());
}

#[test]
fn duplicate_sources_fail_conversion() {
    let mut first = fixtures::allow("web", "db");
    first.id = "first".to_string();
    let mut second = fixtures::deny("web", "db");
    second.id = "second".to_string();

    let err = convert_legacy_intentions(&[first, second]).unwrap_err();
    assert!(err.to_string().contains("duplicates source"));
}

// =============================================================================
// Secondary
// =============================================================================

fn secondary(h: &Harness, cursor: ReplicationCursor) -> SecondaryMigration {
    SecondaryMigration::new(
        h.collaborators(),
        Arc::new(IntentionFormat::new(h.features.clone())),
        cursor,
        Arc::new(ReplicationConfig::for_testing()),
    )
}

#[tokio::test(start_paused = true)]
async fn secondary_walks_every_phase() {
    let h = Harness::new();
    h.primary.upsert_legacy_intention(fixtures::allow("web", "db"));
    let cursor = ReplicationCursor::new();
    let migration = secondary(&h, cursor.clone());
    let never = CancellationToken::never();

    // still legacy: mirror the primary's table
    assert_eq!(migration.run_pass(&never).await.unwrap(), LoopControl::Continue);
    assert_eq!(
        migration.state(),
        MigrationState::ReplicateLegacy {
            last_fetch_index: h.primary.index(),
            legacy_disabled: false,
        }
    );
    assert_eq!(h.store.legacy_intention_ids().len(), 1);

    // everyone upgraded and the primary emptied its table
    h.features.set(true);
    let zeroed = h.primary.clear_legacy_intentions();
    assert_eq!(migration.run_pass(&never).await.unwrap(), LoopControl::Continue);
    assert_eq!(
        migration.state(),
        MigrationState::WaitForConfigReplication {
            primary_zeroed_index: zeroed,
        }
    );
    assert!(h.store.commit_types().iter().all(|t| *t != "IntentionDeleteAll"));

    // config entry replication has not caught up yet
    cursor.set(zeroed - 1);
    assert_eq!(migration.run_pass(&never).await.unwrap(), LoopControl::Continue);
    assert_eq!(migration.state().phase(), MigrationPhase::WaitForConfigReplication);

    cursor.set(zeroed);
    assert_eq!(migration.run_pass(&never).await.unwrap(), LoopControl::Done);
    assert_eq!(migration.state(), MigrationState::Complete);
    assert!(h.store.legacy_intention_ids().is_empty());
    assert_eq!(
        h.store.metadata(INTENTION_FORMAT_KEY).as_deref(),
        Some(INTENTION_FORMAT_CONFIG_ENTRY)
    );
    assert_eq!(h.store.commit_count("SystemMetadataSet"), 1);

    // finished runners stay finished
    assert_eq!(migration.run_pass(&never).await.unwrap(), LoopControl::Done);
    assert_eq!(h.store.commit_count("SystemMetadataSet"), 1);
}

#[tokio::test(start_paused = true)]
async fn secondary_failed_cleanup_keeps_its_phase() {
    let h = Harness::new();
    h.features.set(true);
    let zeroed = h.primary.clear_legacy_intentions();
    let cursor = ReplicationCursor::new();
    cursor.set(zeroed);
    let migration = secondary(&h, cursor);
    let never = CancellationToken::never();
    h.store.reject("SystemMetadataSet");

    assert!(migration.run_pass(&never).await.is_err());
    assert_eq!(migration.state(), MigrationState::DoCleanup);
    assert_eq!(h.store.metadata(INTENTION_FORMAT_KEY), None);

    // a second failure changes nothing either
    assert!(migration.run_pass(&never).await.is_err());
    assert_eq!(migration.state(), MigrationState::DoCleanup);

    h.store.accept_all();
    assert_eq!(migration.run_pass(&never).await.unwrap(), LoopControl::Done);
    assert_eq!(migration.state(), MigrationState::Complete);
    assert_eq!(h.store.commit_count("SystemMetadataSet"), 1);
    assert_eq!(
        h.store.metadata(INTENTION_FORMAT_KEY).as_deref(),
        Some(INTENTION_FORMAT_CONFIG_ENTRY)
    );
}

#[tokio::test(start_paused = true)]
async fn secondary_phase_is_visible_to_subscribers() {
    let h = Harness::new();
    h.primary.upsert_legacy_intention(fixtures::allow("web", "db"));
    let cursor = ReplicationCursor::new();
    let migration = secondary(&h, cursor.clone());
    let phase = migration.subscribe();
    let never = CancellationToken::never();

    migration.run_pass(&never).await.unwrap();
    assert_eq!(phase.borrow().phase(), MigrationPhase::ReplicateLegacy);

    h.features.set(true);
    let zeroed = h.primary.clear_legacy_intentions();
    migration.run_pass(&never).await.unwrap();
    assert_eq!(
        *phase.borrow(),
        MigrationState::WaitForConfigReplication {
            primary_zeroed_index: zeroed,
        }
    );

    cursor.set(zeroed);
    migration.run_pass(&never).await.unwrap();
    assert_eq!(phase.borrow().phase(), MigrationPhase::Complete);
}

#[tokio::test(start_paused = true)]
async fn secondary_mirrors_legacy_changes_in_transactions() {
    let h = Harness::new();
    let gone = fixtures::allow("web", "db");
    h.store.seed_legacy_intention(gone.clone());
    let kept = fixtures::deny("api", "db");
    h.primary.upsert_legacy_intention(kept.clone());
    let migration = secondary(&h, ReplicationCursor::new());

    migration
        .run_pass(&CancellationToken::never())
        .await
        .unwrap();

    assert_eq!(h.store.legacy_intention_ids(), vec![kept.id.clone()]);
    let commits = h.store.commits();
    assert_eq!(commits.len(), 1);
    match &commits[0].request {
        CommitRequest::IntentionTxn(ops) => assert_eq!(ops.len(), 2),
        other => panic!("unexpected commit {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn secondary_stops_legacy_replication_when_primary_switches_first() {
    let h = Harness::new();
    h.primary.upsert_legacy_intention(fixtures::allow("web", "db"));
    h.primary.set_data_origin(Some(DataOrigin::ConfigEntries));
    let migration = secondary(&h, ReplicationCursor::new());

    assert_eq!(
        migration
            .run_pass(&CancellationToken::never())
            .await
            .unwrap(),
        LoopControl::Continue
    );

    assert_eq!(
        migration.state(),
        MigrationState::ReplicateLegacy {
            last_fetch_index: 0,
            legacy_disabled: true,
        }
    );
    assert!(h.store.commits().is_empty());
    // later passes wait for gossip without querying the primary
    let queries = h.primary.queries().len();
    migration
        .run_pass(&CancellationToken::never())
        .await
        .unwrap();
    assert_eq!(h.primary.queries().len(), queries);
}

#[tokio::test(start_paused = true)]
async fn secondary_completes_end_to_end() {
    let h = Harness::new();
    let web_to_db = fixtures::allow("web", "db");
    h.primary.upsert_legacy_intention(web_to_db.clone());
    h.primary.upsert_legacy_intention(fixtures::deny("*", "cache"));
    let engine = h.engine(ReplicationConfig::for_testing()).unwrap();

    engine.establish_leadership().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            h.store.legacy_intention_ids().len() == 2
        })
        .await
    );

    // the primary migrates its own intentions
    for entry in convert_legacy_intentions(&[web_to_db]).unwrap() {
        h.primary.upsert_config_entry(entry);
    }
    h.primary.clear_legacy_intentions();
    h.primary.set_data_origin(Some(DataOrigin::ConfigEntries));
    h.features.set(true);

    assert!(wait_until(Duration::from_secs(10), || engine.migration_complete()).await);
    assert!(h.store.legacy_intention_ids().is_empty());
    assert!(h.store.config_entry_keys().contains(&intentions_key("db")));

    // the converted entry was replicated before the legacy table was cleared
    let types = h.store.commit_types();
    assert!(position(&types, "ConfigEntry") < position(&types, "IntentionDeleteAll"));
    assert!(
        wait_until(Duration::from_secs(5), || {
            !engine.is_routine_running(MIGRATION_ROUTINE_NAME)
        })
        .await
    );

    engine.revoke_leadership().await;
}

#[tokio::test(start_paused = true)]
async fn secondary_honors_completion_recorded_elsewhere() {
    let h = Harness::new();
    h.primary.upsert_legacy_intention(fixtures::allow("web", "db"));
    let migration = secondary(&h, ReplicationCursor::new());
    let never = CancellationToken::never();
    migration.run_pass(&never).await.unwrap();

    h.store
        .seed_metadata(INTENTION_FORMAT_KEY, INTENTION_FORMAT_CONFIG_ENTRY);

    assert_eq!(migration.run_pass(&never).await.unwrap(), LoopControl::Done);
    assert_eq!(migration.state(), MigrationState::Complete);
    assert_eq!(h.store.commit_count("IntentionDeleteAll"), 0);
}
