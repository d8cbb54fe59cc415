//! Error types shared by the replication engine and its collaborators.
//!
//! Cancellation is deliberately absent from every enum here. A leadership
//! loss is reported through outcome types (`ReconcileOutcome::Aborted`,
//! `PassOutcome::Cancelled`) so that callers never log it as a failure.

use std::fmt;

/// Failure reported by the primary-datacenter RPC layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// No route to the primary datacenter
    #[error("primary datacenter unreachable: {message}")]
    Unreachable {
        /// Transport level detail
        message: String,
    },

    /// The call did not complete in time
    #[error("rpc timed out: {method}")]
    Timeout {
        /// Method that timed out
        method: String,
    },

    /// The remote endpoint rejected the request
    #[error("remote error from {method}: {message}")]
    Remote {
        /// Method that failed
        method: String,
        /// Error returned by the remote side
        message: String,
    },
}

impl RpcError {
    /// Create an unreachable error
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    /// Create a remote error
    pub fn remote(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            method: method.into(),
            message: message.into(),
        }
    }
}

/// Failure reading the local replicated store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("local state error: {message}")]
pub struct StateError {
    /// Error message describing the read failure
    pub message: String,
}

impl StateError {
    /// Create a state error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure committing a request through the consensus log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    /// The log could not accept the write (not leader, shutting down, ...)
    #[error("commit of {request_type} failed: {message}")]
    Log {
        /// Request type being committed
        request_type: String,
        /// Error message from the log
        message: String,
    },

    /// The state machine applied the entry but rejected it
    #[error("state machine rejected {request_type}: {message}")]
    Rejected {
        /// Request type being committed
        request_type: String,
        /// Rejection reason
        message: String,
    },
}

impl CommitError {
    /// Create a log error
    pub fn log(request_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Log {
            request_type: request_type.into(),
            message: message.into(),
        }
    }

    /// Create a rejection error
    pub fn rejected(request_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            request_type: request_type.into(),
            message: message.into(),
        }
    }
}

/// Every commit failure collected while reconciling one batch of records.
///
/// The reconciler keeps going after an individual failure; the caller gets
/// the whole set and decides whether to force a resync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyErrors {
    errors: Vec<CommitError>,
}

impl ApplyErrors {
    /// Create an empty error set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure
    pub fn push(&mut self, err: CommitError) {
        self.errors.push(err);
    }

    /// True when nothing failed
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of failed commits
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// The collected failures in commit order
    pub fn errors(&self) -> &[CommitError] {
        &self.errors
    }

    /// `Ok(())` when empty, otherwise `Err(self)`
    pub fn into_result(self) -> Result<(), ApplyErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ApplyErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApplyErrors {}

impl From<CommitError> for ApplyErrors {
    fn from(err: CommitError) -> Self {
        Self { errors: vec![err] }
    }
}

/// Errors surfaced by a replication pass or a migration step.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplicationError {
    /// Fetching from the primary failed
    #[error("failed to retrieve remote {noun}: {source}")]
    Fetch {
        /// Plural noun of the resource being fetched
        noun: &'static str,
        /// Underlying RPC failure
        #[source]
        source: RpcError,
    },

    /// Reading the local snapshot failed
    #[error("failed to retrieve local {noun}: {source}")]
    LocalState {
        /// Plural noun of the resource being read
        noun: &'static str,
        /// Underlying store failure
        #[source]
        source: StateError,
    },

    /// One or more commits failed while applying a diff
    #[error("failed to apply {noun} changes: {source}")]
    Apply {
        /// Plural noun of the resource being applied
        noun: &'static str,
        /// Collected commit failures
        #[source]
        source: ApplyErrors,
    },

    /// A single commit outside of a reconcile batch failed
    #[error(transparent)]
    Commit(#[from] CommitError),

    /// The replication credential cannot read secrets
    #[error(
        "detected redacted {noun} secrets: the replication token in use does not grant acl:write"
    )]
    RedactedData {
        /// Singular noun of the redacted resource
        noun: &'static str,
    },

    /// Converting legacy intentions to config entries failed
    #[error("intention conversion failed: {message}")]
    Conversion {
        /// Validation or normalization failure
        message: String,
    },

    /// The migration received an event its current phase does not accept
    #[error("migration event {event} is not valid in phase {phase}")]
    InvalidTransition {
        /// Phase the migration was in
        phase: &'static str,
        /// Event that was rejected
        event: &'static str,
    },
}

impl ReplicationError {
    /// Wrap an RPC failure for the given resource
    pub fn fetch(noun: &'static str, source: RpcError) -> Self {
        Self::Fetch { noun, source }
    }

    /// Wrap a local read failure for the given resource
    pub fn local_state(noun: &'static str, source: StateError) -> Self {
        Self::LocalState { noun, source }
    }

    /// Wrap collected commit failures for the given resource
    pub fn apply(noun: &'static str, source: ApplyErrors) -> Self {
        Self::Apply { noun, source }
    }

    /// Create a conversion error
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
        }
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed
    #[error("invalid configuration document: {message}")]
    Parse {
        /// Parser message
        message: String,
    },

    /// A field holds an unusable value
    #[error("invalid value for {field}: {message}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why the value is unusable
        message: String,
    },
}

impl ConfigError {
    /// Create an invalid field error
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}

/// Standard result type for replication operations
pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;
