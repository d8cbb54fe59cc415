//! Legacy intention migration state machine (secondary datacenters).
//!
//! A secondary keeps replicating the primary's legacy intentions table until
//! every server in both datacenters understands intentions stored as config
//! entries. It then waits for the primary to empty its legacy table, waits
//! for its own config entry replication to catch up with the index of that
//! emptying write, and finally clears its own legacy table.
//!
//! ```text
//! ReplicateLegacy -> WaitForPrimary -> WaitForConfigReplication -> DoCleanup -> Complete
//! ```
//!
//! [`transition`] is pure. The runner in `xdc-replication` performs the
//! side effect for the current phase, turns the result into an event and
//! feeds it back through [`transition`].

use crate::errors::ReplicationError;
use crate::index::next_index_val;
use serde::{Deserialize, Serialize};
use std::fmt;

/// System metadata key recording which intention storage format is canonical.
pub const INTENTION_FORMAT_KEY: &str = "intention-format";

/// Value of [`INTENTION_FORMAT_KEY`] once migration has completed.
pub const INTENTION_FORMAT_CONFIG_ENTRY: &str = "config-entry";

/// Coarse progress marker, ordered from first to last phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MigrationPhase {
    ReplicateLegacy,
    WaitForPrimary,
    WaitForConfigReplication,
    DoCleanup,
    Complete,
}

impl MigrationPhase {
    /// Name used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationPhase::ReplicateLegacy => "replicate-legacy",
            MigrationPhase::WaitForPrimary => "wait-for-primary",
            MigrationPhase::WaitForConfigReplication => "wait-for-config-replication",
            MigrationPhase::DoCleanup => "do-cleanup",
            MigrationPhase::Complete => "complete",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full migration state, including the indices each phase blocks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationState {
    /// Mirror the primary's legacy table
    ReplicateLegacy {
        /// Remote index of the last legacy fetch
        last_fetch_index: u64,
        /// The primary stopped serving legacy data before this datacenter
        /// confirmed compatibility
        legacy_disabled: bool,
    },
    /// Block on the primary's legacy-only listing until it is empty
    WaitForPrimary {
        /// Remote index of the last legacy-only fetch
        last_fetch_index: u64,
    },
    /// Wait for config entry replication to reach the index that emptied the
    /// primary's legacy table
    WaitForConfigReplication { primary_zeroed_index: u64 },
    /// Clear the local legacy table and record completion
    DoCleanup,
    /// Migration finished (terminal)
    Complete,
}

impl Default for MigrationState {
    fn default() -> Self {
        MigrationState::ReplicateLegacy {
            last_fetch_index: 0,
            legacy_disabled: false,
        }
    }
}

impl MigrationState {
    /// Coarse phase of this state
    pub fn phase(&self) -> MigrationPhase {
        match self {
            MigrationState::ReplicateLegacy { .. } => MigrationPhase::ReplicateLegacy,
            MigrationState::WaitForPrimary { .. } => MigrationPhase::WaitForPrimary,
            MigrationState::WaitForConfigReplication { .. } => {
                MigrationPhase::WaitForConfigReplication
            }
            MigrationState::DoCleanup => MigrationPhase::DoCleanup,
            MigrationState::Complete => MigrationPhase::Complete,
        }
    }

    /// Terminal state reached
    pub fn is_complete(&self) -> bool {
        matches!(self, MigrationState::Complete)
    }
}

/// Outcome of one side effect, fed back into [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationEvent {
    /// System metadata already says config entries are canonical
    CompletionObserved,
    /// Every server in the primary and local datacenter supports the new format
    CompatibilityConfirmed,
    /// A legacy replication pass succeeded at this remote index
    LegacyReplicated { index: u64 },
    /// The primary answered with config-entry backed intentions
    LegacyModeEnded,
    /// Legacy-only listing of the primary returned `remaining` rows at `index`
    PrimaryLegacyCount { index: u64, remaining: usize },
    /// Local config entry replication has reached `index`
    ConfigReplicatedThrough { index: u64 },
    /// The local legacy table was cleared and completion recorded
    CleanupCommitted,
}

impl MigrationEvent {
    fn name(&self) -> &'static str {
        match self {
            MigrationEvent::CompletionObserved => "completion-observed",
            MigrationEvent::CompatibilityConfirmed => "compatibility-confirmed",
            MigrationEvent::LegacyReplicated { .. } => "legacy-replicated",
            MigrationEvent::LegacyModeEnded => "legacy-mode-ended",
            MigrationEvent::PrimaryLegacyCount { .. } => "primary-legacy-count",
            MigrationEvent::ConfigReplicatedThrough { .. } => "config-replicated-through",
            MigrationEvent::CleanupCommitted => "cleanup-committed",
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State after the event
    pub next: MigrationState,
    /// The phase changed, so the runner should act again without waiting
    pub advanced: bool,
}

impl Transition {
    fn stay(next: MigrationState) -> Self {
        Self {
            next,
            advanced: false,
        }
    }

    fn advance(next: MigrationState) -> Self {
        Self {
            next,
            advanced: true,
        }
    }
}

/// Apply `event` to `state`.
///
/// Phases only move forward. Events that do not belong to the current phase
/// are rejected and leave the caller's state untouched.
pub fn transition(
    state: MigrationState,
    event: MigrationEvent,
) -> Result<Transition, ReplicationError> {
    use MigrationEvent as E;
    use MigrationState as S;

    let next = match (state, event) {
        (S::Complete, E::CompletionObserved) => Transition::stay(S::Complete),
        (_, E::CompletionObserved) => Transition::advance(S::Complete),

        (S::ReplicateLegacy { .. }, E::CompatibilityConfirmed) => {
            Transition::advance(S::WaitForPrimary {
                last_fetch_index: 0,
            })
        }
        (
            S::ReplicateLegacy {
                last_fetch_index, ..
            },
            E::LegacyReplicated { index },
        ) => Transition::stay(S::ReplicateLegacy {
            last_fetch_index: next_index_val(last_fetch_index, index),
            legacy_disabled: false,
        }),
        (
            S::ReplicateLegacy {
                last_fetch_index, ..
            },
            E::LegacyModeEnded,
        ) => Transition::stay(S::ReplicateLegacy {
            last_fetch_index,
            legacy_disabled: true,
        }),

        (S::WaitForPrimary { last_fetch_index }, E::PrimaryLegacyCount { index, remaining }) => {
            let last_fetch_index = next_index_val(last_fetch_index, index);
            if remaining == 0 {
                Transition::advance(S::WaitForConfigReplication {
                    primary_zeroed_index: last_fetch_index,
                })
            } else {
                Transition::stay(S::WaitForPrimary { last_fetch_index })
            }
        }

        (
            S::WaitForConfigReplication {
                primary_zeroed_index,
            },
            E::ConfigReplicatedThrough { index },
        ) => {
            if index >= primary_zeroed_index {
                Transition::advance(S::DoCleanup)
            } else {
                Transition::stay(state)
            }
        }

        (S::DoCleanup, E::CleanupCommitted) => Transition::advance(S::Complete),

        (state, event) => {
            return Err(ReplicationError::InvalidTransition {
                phase: state.phase().as_str(),
                event: event.name(),
            })
        }
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn legacy_replication_tracks_index() {
        let t = transition(
            MigrationState::default(),
            MigrationEvent::LegacyReplicated { index: 12 },
        )
        .unwrap();
        assert!(!t.advanced);
        assert_eq!(
            t.next,
            MigrationState::ReplicateLegacy {
                last_fetch_index: 12,
                legacy_disabled: false
            }
        );
    }

    #[test]
    fn primary_drained_records_zeroing_index() {
        let t = transition(
            MigrationState::WaitForPrimary {
                last_fetch_index: 5,
            },
            MigrationEvent::PrimaryLegacyCount {
                index: 40,
                remaining: 0,
            },
        )
        .unwrap();
        assert!(t.advanced);
        assert_eq!(
            t.next,
            MigrationState::WaitForConfigReplication {
                primary_zeroed_index: 40
            }
        );
    }

    #[test]
    fn config_replication_must_catch_up() {
        let state = MigrationState::WaitForConfigReplication {
            primary_zeroed_index: 40,
        };
        let behind =
            transition(state, MigrationEvent::ConfigReplicatedThrough { index: 39 }).unwrap();
        assert_eq!(behind.next, state);

        let caught_up =
            transition(state, MigrationEvent::ConfigReplicatedThrough { index: 40 }).unwrap();
        assert_eq!(caught_up.next, MigrationState::DoCleanup);
    }

    #[test]
    fn completion_short_circuits_any_phase() {
        let t = transition(
            MigrationState::WaitForPrimary {
                last_fetch_index: 3,
            },
            MigrationEvent::CompletionObserved,
        )
        .unwrap();
        assert!(t.next.is_complete());
    }

    #[test]
    fn out_of_phase_event_is_rejected() {
        assert_matches!(
            transition(MigrationState::DoCleanup, MigrationEvent::CompatibilityConfirmed),
            Err(ReplicationError::InvalidTransition {
                phase: "do-cleanup",
                ..
            })
        );
    }
}
