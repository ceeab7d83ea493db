//! Configuration for the table batch writer
//!
//! `WriterConfig` is what the writer runs on. `WriterArgs` exposes the same
//! knobs as CLI arguments / environment variables so a host application can
//! `#[command(flatten)]` them into its own argument struct.

use std::time::Duration;

use clap::Parser;

use crate::batch::MAX_BATCH_SIZE;
use crate::error::{Result, WriterError};
use crate::retry::{RequestPolicy, RetryPolicy};
use crate::telemetry::{self, LogFormat};

/// Table written to when none is configured
pub const DEFAULT_TABLE_NAME: &str = "chatmessages";

/// Configuration for the writer
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Target table
    pub table_name: String,
    /// Operations per batch request (1..=100)
    pub batch_size: usize,
    /// Partitions flushed concurrently (1 = sequential)
    pub max_parallel_partitions: usize,
    /// Auto-flush interval in milliseconds
    pub flush_interval_ms: u64,
    /// Timeout and retry policy for each batch request
    pub request_policy: RequestPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            batch_size: MAX_BATCH_SIZE,
            max_parallel_partitions: 4,
            flush_interval_ms: 1000,
            request_policy: RequestPolicy::default(),
        }
    }
}

impl WriterConfig {
    pub fn with_table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_request_policy(mut self, policy: RequestPolicy) -> Self {
        self.request_policy = policy;
        self
    }

    /// Config for chat-style traffic (fast flush, short timeouts)
    pub fn for_interactive() -> Self {
        Self {
            flush_interval_ms: 100,
            request_policy: RequestPolicy {
                timeout: Some(Duration::from_secs(5)),
                retry: RetryPolicy {
                    max_retries: 2,
                    initial_backoff: Duration::from_millis(50),
                    max_backoff: Duration::from_secs(1),
                    backoff_multiplier: 2.0,
                },
            },
            ..Self::default()
        }
    }

    /// Config for imports and backfills (wide fan-out, patient retries)
    pub fn for_bulk() -> Self {
        Self {
            max_parallel_partitions: 16,
            flush_interval_ms: 5000,
            request_policy: RequestPolicy {
                timeout: Some(Duration::from_secs(60)),
                retry: RetryPolicy {
                    max_retries: 6,
                    initial_backoff: Duration::from_millis(200),
                    max_backoff: Duration::from_secs(30),
                    backoff_multiplier: 2.0,
                },
            },
            ..Self::default()
        }
    }

    /// One partition at a time, single attempt per batch
    pub fn sequential() -> Self {
        Self {
            max_parallel_partitions: 1,
            request_policy: RequestPolicy::no_retry(),
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(WriterError::Config("table name must not be empty".into()));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(WriterError::Config(format!(
                "batch size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }
        if self.max_parallel_partitions == 0 {
            return Err(WriterError::Config(
                "max parallel partitions must be at least 1".into(),
            ));
        }
        if self.request_policy.retry.backoff_multiplier < 1.0 {
            return Err(WriterError::Config(
                "backoff multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }
}

/// Table writer arguments
///
/// `into_config` only covers the writer itself. The host still owns the rest:
/// it hands `connection_string` to whatever `TableStore` client it
/// builds, and it installs logging from `log_level` / `log_format` (see
/// `try_init_tracing`).
#[derive(Parser, Debug, Clone)]
#[command(name = "table-batch-writer")]
pub struct WriterArgs {
    /// Storage account connection string, handed to the store client
    #[arg(long, env = "STORAGE_CONNECTION_STRING")]
    pub connection_string: String,

    /// Table to write to
    #[arg(long, env = "STORAGE_TABLE_NAME", default_value = DEFAULT_TABLE_NAME)]
    pub table_name: String,

    /// Operations per batch request (max 100)
    #[arg(long, env = "WRITER_BATCH_SIZE", default_value = "100")]
    pub batch_size: usize,

    /// Partitions flushed concurrently
    #[arg(long, env = "WRITER_MAX_PARALLEL_PARTITIONS", default_value = "4")]
    pub max_parallel_partitions: usize,

    /// Auto-flush interval in milliseconds
    #[arg(long, env = "WRITER_FLUSH_INTERVAL_MS", default_value = "1000")]
    pub flush_interval_ms: u64,

    /// Per-attempt request timeout in milliseconds (0 disables)
    #[arg(long, env = "WRITER_REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Retries per batch request after the first attempt
    #[arg(long, env = "WRITER_MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    /// Initial retry backoff in milliseconds
    #[arg(long, env = "WRITER_INITIAL_BACKOFF_MS", default_value = "100")]
    pub initial_backoff_ms: u64,

    /// Maximum retry backoff in milliseconds
    #[arg(long, env = "WRITER_MAX_BACKOFF_MS", default_value = "5000")]
    pub max_backoff_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl WriterArgs {
    /// Install the global subscriber from `log_level` and `log_format`.
    ///
    /// Returns `false` if one was already set.
    pub fn try_init_tracing(&self) -> bool {
        telemetry::try_init_tracing(&self.log_level, self.log_format)
    }

    /// Build and validate a writer config.
    pub fn into_config(self) -> Result<WriterConfig> {
        if self.connection_string.trim().is_empty() {
            return Err(WriterError::Config(
                "STORAGE_CONNECTION_STRING must not be empty".into(),
            ));
        }

        let config = WriterConfig {
            table_name: self.table_name,
            batch_size: self.batch_size,
            max_parallel_partitions: self.max_parallel_partitions,
            flush_interval_ms: self.flush_interval_ms,
            request_policy: RequestPolicy {
                timeout: (self.request_timeout_ms > 0)
                    .then(|| Duration::from_millis(self.request_timeout_ms)),
                retry: RetryPolicy {
                    max_retries: self.max_retries,
                    initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                    max_backoff: Duration::from_millis(self.max_backoff_ms),
                    ..RetryPolicy::default()
                },
            },
        };
        config.validate()?;
        Ok(config)
    }
}
