#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]
#![allow(missing_docs)]
//! # xdc-core - Cross-datacenter reconciliation primitives
//!
//! Pure building blocks shared by the replication runtime:
//! - Replicated records (ACL policies, roles, tokens, config entries,
//!   legacy intentions) and the [`Replicable`] capability set
//! - The two-pointer diff engine and batch splitting
//! - Consensus-log requests and the replication status snapshot
//! - The legacy intention migration state machine
//! - Configuration and error types
//!
//! Nothing in this crate performs I/O or spawns tasks.

pub mod batch;
pub mod commit;
pub mod config;
pub mod diff;
pub mod errors;
pub mod index;
pub mod migration;
pub mod records;
pub mod status;

pub use batch::{chunk_by_count, chunk_by_size};
pub use commit::{CommitRequest, ConfigEntryOp, IntentionOp};
pub use config::{BackoffStrategy, ReplicationConfig, RetryPolicy};
pub use diff::{diff, DiffResult};
pub use errors::{
    ApplyErrors, CommitError, ConfigError, ReplicationError, ReplicationResult, RpcError,
    StateError,
};
pub use index::{next_index_val, Indexed, QueryOptions, RaftIndex};
pub use migration::{transition, MigrationEvent, MigrationPhase, MigrationState, Transition};
pub use records::{Comparison, Replicable, ResourceKind};
pub use status::{KindStatus, ReplicationStatus, ReplicationType};
