#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]
#![allow(missing_docs)]
//! # xdc-replication - Leader-side cross-datacenter replication
//!
//! Runtime half of the replication engine, built on `xdc-core`:
//! - [`Replicator`]: one blocking-fetch, diff and reconcile loop per
//!   resource kind, with cursor resets and capped backoff on failure
//! - [`Reconciler`]: rate-limited commits that abort cleanly on cancellation
//! - [`RoutineManager`]: named, idempotent leader routines
//! - [`migration`]: legacy intention migration for primary and secondaries
//! - [`ReplicationEngine`]: starts and stops all of the above with
//!   leadership
//!
//! The consensus log, the primary datacenter RPC layer and the local store
//! are reached only through the traits in [`collaborators`].

pub mod cancel;
pub mod collaborators;
pub mod leader;
pub mod migration;
pub mod reconciler;
pub mod replicator;
pub mod retry;
pub mod routine;
pub mod status;

pub use cancel::{CancellationSource, CancellationToken};
pub use collaborators::{
    ClusterFeatures, Collaborators, CommitLog, IntentionListing, LocalState, PrimaryDatacenter,
    ReplicationCredentials, SystemMetadata,
};
pub use leader::{ReplicationEngine, TermCursors};
pub use migration::{IntentionFormat, PrimaryMigration, SecondaryMigration, MIGRATION_ROUTINE_NAME};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use replicator::{PassOutcome, ReplicationCursor, ReplicationDelegate, Replicator};
pub use retry::{retry_loop_backoff, LoopControl};
pub use routine::RoutineManager;
pub use status::StatusTracker;
