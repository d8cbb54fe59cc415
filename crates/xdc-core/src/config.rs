//! Replication engine configuration.
//!
//! Loaded from TOML. Durations are written in milliseconds:
//!
//! ```toml
//! datacenter = "dc2"
//! primary_datacenter = "dc1"
//! acl_token_replication = true
//! apply_limit = 100
//!
//! [replication_backoff]
//! initial_delay_ms = 2000
//! max_delay_ms = 64000
//! strategy = "Exponential"
//! ```

use crate::batch::{DEFAULT_DELETE_BATCH, DEFAULT_UPSERT_BATCH_BYTES};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Legacy intention transactions stay below a quarter of the log's warning size.
pub const DEFAULT_INTENTION_TXN_BYTES: usize = 1024 * 1024 / 4;

// =============================================================================
// Backoff
// =============================================================================

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear increase: delay * attempt
    Linear,
    /// Exponential increase: delay * 2^attempt
    Exponential,
    /// Exponential with up to 10% jitter
    ExponentialWithJitter,
}

impl BackoffStrategy {
    /// Calculate delay for a zero-based attempt number, capped at `max_delay`
    pub fn calculate_delay(
        &self,
        attempt: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Duration {
        use rand::Rng;

        let delay = match self {
            BackoffStrategy::Fixed => initial_delay,
            BackoffStrategy::Linear => initial_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Exponential => {
                initial_delay.saturating_mul(2u32.saturating_pow(attempt))
            }
            BackoffStrategy::ExponentialWithJitter => {
                let base_delay = initial_delay.saturating_mul(2u32.saturating_pow(attempt));
                let jitter =
                    (base_delay.as_millis() as f64 * 0.1 * rand::thread_rng().gen::<f64>()) as u64;
                base_delay.saturating_add(Duration::from_millis(jitter))
            }
        };

        delay.min(max_delay)
    }
}

/// Delay schedule for loops that retry forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failure
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Growth between consecutive failures
    pub strategy: BackoffStrategy,
}

impl RetryPolicy {
    /// Exponential backoff between `initial` and `max`
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Constant delay
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after `failures` consecutive failures (1-based)
    pub fn delay_for_failures(&self, failures: u32) -> Duration {
        self.strategy.calculate_delay(
            failures.saturating_sub(1),
            self.initial_delay,
            self.max_delay,
        )
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.initial_delay.is_zero() {
            return Err(ConfigError::invalid(field, "initial delay must be non-zero"));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::invalid(
                field,
                "max delay must not be shorter than the initial delay",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Engine configuration
// =============================================================================

/// Configuration for the replication engine of one datacenter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Name of the local datacenter
    pub datacenter: String,
    /// Authoritative datacenter; empty means the local one
    pub primary_datacenter: String,
    /// Replicate global ACL tokens in addition to policies and roles
    pub acl_token_replication: bool,
    /// Service mesh features (and with them intentions) are enabled
    pub connect_enabled: bool,
    /// Maximum replication commits per second
    pub apply_limit: u32,
    /// Maximum replication passes per second, per resource kind
    pub replication_rate: u32,
    /// Estimated byte budget for one upsert commit
    pub max_upsert_batch_bytes: usize,
    /// Maximum keys deleted by one commit
    pub max_delete_batch: usize,
    /// Estimated byte budget for one legacy intention transaction
    pub max_intention_txn_bytes: usize,
    /// Backoff after failed replication passes
    pub replication_backoff: RetryPolicy,
    /// Backoff after failed intention migration passes
    pub migration_backoff: RetryPolicy,
    /// Minimum spacing between two intention migration passes
    #[serde(rename = "migration_pass_interval_ms", with = "duration_ms")]
    pub migration_pass_interval: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            datacenter: "dc1".to_string(),
            primary_datacenter: String::new(),
            acl_token_replication: false,
            connect_enabled: true,
            apply_limit: 100,
            replication_rate: 1,
            max_upsert_batch_bytes: DEFAULT_UPSERT_BATCH_BYTES,
            max_delete_batch: DEFAULT_DELETE_BATCH,
            max_intention_txn_bytes: DEFAULT_INTENTION_TXN_BYTES,
            // 2s after the first failure, doubling up to 64s
            replication_backoff: RetryPolicy::exponential(
                Duration::from_secs(2),
                Duration::from_secs(64),
            ),
            migration_backoff: RetryPolicy::exponential(
                Duration::from_secs(2),
                Duration::from_secs(256),
            ),
            migration_pass_interval: Duration::from_secs(5),
        }
    }
}

impl ReplicationConfig {
    /// Secondary datacenter `dc2` replicating from `dc1`, with fast limits
    pub fn for_testing() -> Self {
        Self {
            datacenter: "dc2".to_string(),
            primary_datacenter: "dc1".to_string(),
            acl_token_replication: true,
            connect_enabled: true,
            apply_limit: 1000,
            replication_rate: 100,
            max_upsert_batch_bytes: 4 * 1024,
            max_delete_batch: 16,
            max_intention_txn_bytes: 4 * 1024,
            replication_backoff: RetryPolicy::exponential(
                Duration::from_millis(10),
                Duration::from_millis(640),
            ),
            migration_backoff: RetryPolicy::exponential(
                Duration::from_millis(10),
                Duration::from_millis(640),
            ),
            migration_pass_interval: Duration::from_millis(10),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Datacenter holding the authoritative state
    pub fn primary(&self) -> &str {
        if self.primary_datacenter.is_empty() {
            &self.datacenter
        } else {
            &self.primary_datacenter
        }
    }

    /// Local datacenter is the primary
    pub fn is_primary(&self) -> bool {
        self.primary() == self.datacenter
    }

    /// Check every field holds a usable value
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datacenter.is_empty() {
            return Err(ConfigError::invalid("datacenter", "must not be empty"));
        }
        if self.apply_limit == 0 {
            return Err(ConfigError::invalid("apply_limit", "must be at least 1"));
        }
        if self.replication_rate == 0 {
            return Err(ConfigError::invalid("replication_rate", "must be at least 1"));
        }
        if self.max_upsert_batch_bytes == 0 {
            return Err(ConfigError::invalid("max_upsert_batch_bytes", "must be non-zero"));
        }
        if self.max_delete_batch == 0 {
            return Err(ConfigError::invalid("max_delete_batch", "must be non-zero"));
        }
        if self.max_intention_txn_bytes == 0 {
            return Err(ConfigError::invalid("max_intention_txn_bytes", "must be non-zero"));
        }
        self.replication_backoff.validate("replication_backoff")?;
        self.migration_backoff.validate("migration_backoff")?;
        Ok(())
    }

    /// Minimum spacing between two commits
    pub fn apply_interval(&self) -> Duration {
        Duration::from_secs(1) / self.apply_limit.max(1)
    }

    /// Minimum spacing between two replication passes
    pub fn pass_interval(&self) -> Duration {
        Duration::from_secs(1) / self.replication_rate.max(1)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
