//! Legacy intention migration state machine walkthroughs.

use proptest::prelude::*;
use xdc_core::{transition, MigrationEvent, MigrationPhase, MigrationState};

fn drive(events: &[MigrationEvent]) -> (MigrationState, Vec<MigrationPhase>) {
    let mut state = MigrationState::default();
    let mut phases = vec![state.phase()];
    for event in events {
        if let Ok(t) = transition(state, *event) {
            state = t.next;
        }
        phases.push(state.phase());
    }
    (state, phases)
}

#[test]
fn happy_path_reaches_complete() {
    let (state, phases) = drive(&[
        MigrationEvent::LegacyReplicated { index: 10 },
        MigrationEvent::LegacyReplicated { index: 14 },
        MigrationEvent::CompatibilityConfirmed,
        MigrationEvent::PrimaryLegacyCount {
            index: 20,
            remaining: 3,
        },
        MigrationEvent::PrimaryLegacyCount {
            index: 31,
            remaining: 0,
        },
        MigrationEvent::ConfigReplicatedThrough { index: 25 },
        MigrationEvent::ConfigReplicatedThrough { index: 31 },
        MigrationEvent::CleanupCommitted,
    ]);

    assert!(state.is_complete());
    assert_eq!(
        phases,
        vec![
            MigrationPhase::ReplicateLegacy,
            MigrationPhase::ReplicateLegacy,
            MigrationPhase::ReplicateLegacy,
            MigrationPhase::WaitForPrimary,
            MigrationPhase::WaitForPrimary,
            MigrationPhase::WaitForConfigReplication,
            MigrationPhase::WaitForConfigReplication,
            MigrationPhase::DoCleanup,
            MigrationPhase::Complete,
        ]
    );
}

#[test]
fn legacy_mode_end_waits_for_compatibility() {
    let (state, _) = drive(&[
        MigrationEvent::LegacyReplicated { index: 7 },
        MigrationEvent::LegacyModeEnded,
    ]);
    assert_eq!(
        state,
        MigrationState::ReplicateLegacy {
            last_fetch_index: 7,
            legacy_disabled: true,
        }
    );

    let t = transition(state, MigrationEvent::CompatibilityConfirmed).unwrap();
    assert!(t.advanced);
    assert_eq!(
        t.next,
        MigrationState::WaitForPrimary {
            last_fetch_index: 0
        }
    );
}

#[test]
fn primary_index_regression_restarts_blocking() {
    let state = MigrationState::WaitForPrimary {
        last_fetch_index: 50,
    };
    let t = transition(
        state,
        MigrationEvent::PrimaryLegacyCount {
            index: 12,
            remaining: 2,
        },
    )
    .unwrap();
    assert_eq!(
        t.next,
        MigrationState::WaitForPrimary {
            last_fetch_index: 0
        }
    );
}

fn event() -> impl Strategy<Value = MigrationEvent> {
    prop_oneof![
        Just(MigrationEvent::CompatibilityConfirmed),
        Just(MigrationEvent::LegacyModeEnded),
        Just(MigrationEvent::CleanupCommitted),
        (0u64..100).prop_map(|index| MigrationEvent::LegacyReplicated { index }),
        (0u64..100, 0usize..3)
            .prop_map(|(index, remaining)| MigrationEvent::PrimaryLegacyCount { index, remaining }),
        (0u64..100).prop_map(|index| MigrationEvent::ConfigReplicatedThrough { index }),
    ]
}

proptest! {
    #[test]
    fn phases_never_move_backwards(events in prop::collection::vec(event(), 0..40)) {
        let (_, phases) = drive(&events);
        for pair in phases.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn rejected_events_leave_state_alone(events in prop::collection::vec(event(), 0..20)) {
        let mut state = MigrationState::default();
        for event in events {
            match transition(state, event) {
                Ok(t) => state = t.next,
                Err(_) => {
                    // re-applying must fail identically, nothing was consumed
                    prop_assert!(transition(state, event).is_err());
                }
            }
        }
    }
}
