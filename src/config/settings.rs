use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::BrokerError;

/// Hard ceiling on entries per batch imposed by the queueing service.
pub const SERVICE_MAX_BATCH_ENTRIES: usize = 10;

/// Hard ceiling on the total payload of one batch imposed by the queueing service.
pub const SERVICE_MAX_BATCH_BYTES: usize = 256 * 1024;

/// Bounds applied to a derived scheduler poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

/// Console log output.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit one JSON object per event instead of human-readable lines
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Constructor-time configuration of a [`crate::broker::BatchBroker`].
///
/// Durations are expressed in (fractional) seconds so the record can be
/// loaded straight from config files and environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Prefix applied to physical queue names handed to the send client
    #[serde(default)]
    pub namespace: String,
    /// Max age of the oldest buffered entry before a flush is forced
    #[serde(default = "default_batch_interval")]
    pub default_batch_interval: f64,
    /// Flush after this much producer quiescence
    #[serde(default = "default_idle_timeout")]
    pub default_idle_timeout: f64,
    /// Max entries per batch (the service allows at most 10)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-queue batch interval overrides
    #[serde(default)]
    pub group_batch_intervals: HashMap<String, f64>,
    /// Per-queue idle timeout overrides
    #[serde(default)]
    pub group_idle_timeouts: HashMap<String, f64>,
    /// Backpressure ceiling per queue buffer
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size_per_queue: usize,
    /// Terminal drop threshold for retryable failures
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: f64,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay: f64,
    /// Additive jitter (0.0 to 1.0) applied on top of the backoff delay
    #[serde(default)]
    pub retry_jitter_factor: f64,
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,
    /// Bytes kept free in every batch for protocol framing
    #[serde(default = "default_overhead_reserve")]
    pub batch_overhead_reserve_bytes: usize,
    /// Largest single entry that can ever be dispatched
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: usize,
    /// Explicit scheduler tick; derived from the queue timings when absent
    #[serde(default)]
    pub poll_interval: Option<f64>,
    #[serde(default = "default_send_timeout")]
    pub send_timeout: f64,
    /// Bounded wait for the scheduler task during close
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: f64,
}

fn default_batch_interval() -> f64 {
    1.0
}

fn default_idle_timeout() -> f64 {
    0.1
}

fn default_batch_size() -> usize {
    SERVICE_MAX_BATCH_ENTRIES
}

fn default_max_buffer_size() -> usize {
    5000
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> f64 {
    1.0
}

fn default_retry_max_delay() -> f64 {
    60.0
}

fn default_max_batch_bytes() -> usize {
    SERVICE_MAX_BATCH_BYTES
}

fn default_overhead_reserve() -> usize {
    1024
}

fn default_max_entry_bytes() -> usize {
    SERVICE_MAX_BATCH_BYTES
}

fn default_send_timeout() -> f64 {
    30.0
}

fn default_shutdown_timeout() -> f64 {
    5.0
}

/// OTLP trace export.
#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "sqs-batch-broker".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            default_batch_interval: default_batch_interval(),
            default_idle_timeout: default_idle_timeout(),
            batch_size: default_batch_size(),
            group_batch_intervals: HashMap::new(),
            group_idle_timeouts: HashMap::new(),
            max_buffer_size_per_queue: default_max_buffer_size(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_base_delay: default_retry_base_delay(),
            retry_max_delay: default_retry_max_delay(),
            retry_jitter_factor: 0.0,
            max_batch_bytes: default_max_batch_bytes(),
            batch_overhead_reserve_bytes: default_overhead_reserve(),
            max_entry_bytes: default_max_entry_bytes(),
            poll_interval: None,
            send_timeout: default_send_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("broker.default_batch_interval", default_batch_interval())?
            .set_default("broker.default_idle_timeout", default_idle_timeout())?
            .set_default("broker.batch_size", default_batch_size() as i64)?
            .set_default("broker.max_buffer_size_per_queue", default_max_buffer_size() as i64)?
            .set_default("broker.max_retry_attempts", default_max_retry_attempts() as i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // BROKER__BROKER__NAMESPACE, BROKER__OTEL__ENABLED, etc.
            .add_source(
                Environment::with_prefix("BROKER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

/// Timing policy for one queue, resolved from defaults and per-queue overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub batch_interval: Duration,
    pub idle_timeout: Duration,
}

/// Validated configuration with every duration converted and every
/// per-queue override merged into a typed [`QueuePolicy`].
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub namespace: String,
    pub batch_size: usize,
    pub max_buffer_size_per_queue: usize,
    pub max_retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_jitter_factor: f64,
    /// Byte budget of one batch after the overhead reserve
    pub batch_byte_budget: usize,
    pub max_entry_bytes: usize,
    pub poll_interval: Duration,
    pub send_timeout: Duration,
    pub shutdown_timeout: Duration,
    default_policy: QueuePolicy,
    policies: HashMap<String, QueuePolicy>,
}

impl ResolvedConfig {
    /// Policy for a logical queue name; queues without overrides get the defaults.
    pub fn policy_for(&self, queue_name: &str) -> QueuePolicy {
        self.policies
            .get(queue_name)
            .copied()
            .unwrap_or(self.default_policy)
    }

    pub fn default_policy(&self) -> QueuePolicy {
        self.default_policy
    }

    /// Physical queue name as seen by the send client.
    pub fn physical_name(&self, queue_name: &str) -> String {
        format!("{}{}", self.namespace, queue_name)
    }
}

/// Convert a seconds value, rejecting negative, non-finite and out-of-range input.
fn seconds(field: &str, value: f64) -> Result<Duration, BrokerError> {
    Duration::try_from_secs_f64(value).map_err(|e| {
        BrokerError::InvalidConfig(format!(
            "{} must be a non-negative number of seconds, got {} ({})",
            field, value, e
        ))
    })
}

impl BrokerConfig {
    /// Reject values that cannot be resolved.
    pub fn validate(&self) -> Result<(), BrokerError> {
        self.resolve().map(|_| ())
    }

    /// Validate and convert into a [`ResolvedConfig`].
    pub fn resolve(&self) -> Result<ResolvedConfig, BrokerError> {
        if self.batch_size == 0 {
            return Err(BrokerError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.max_buffer_size_per_queue == 0 {
            return Err(BrokerError::InvalidConfig(
                "max_buffer_size_per_queue must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(BrokerError::InvalidConfig(format!(
                "retry_jitter_factor must be within 0.0..=1.0, got {}",
                self.retry_jitter_factor
            )));
        }

        let batch_size = if self.batch_size > SERVICE_MAX_BATCH_ENTRIES {
            tracing::warn!(
                requested = self.batch_size,
                limit = SERVICE_MAX_BATCH_ENTRIES,
                "batch_size exceeds the service limit, clamping"
            );
            SERVICE_MAX_BATCH_ENTRIES
        } else {
            self.batch_size
        };

        let max_batch_bytes = self.max_batch_bytes.min(SERVICE_MAX_BATCH_BYTES);
        if self.batch_overhead_reserve_bytes >= max_batch_bytes {
            return Err(BrokerError::InvalidConfig(format!(
                "batch_overhead_reserve_bytes ({}) leaves no room in a {} byte batch",
                self.batch_overhead_reserve_bytes, max_batch_bytes
            )));
        }
        let batch_byte_budget = max_batch_bytes - self.batch_overhead_reserve_bytes;
        // An entry that cannot fit in an otherwise empty batch is never sendable.
        let max_entry_bytes = self.max_entry_bytes.min(batch_byte_budget);

        let default_policy = QueuePolicy {
            batch_interval: seconds("default_batch_interval", self.default_batch_interval)?,
            idle_timeout: seconds("default_idle_timeout", self.default_idle_timeout)?,
        };

        let mut policies = HashMap::new();
        let overridden = self
            .group_batch_intervals
            .keys()
            .chain(self.group_idle_timeouts.keys());
        for queue_name in overridden {
            if policies.contains_key(queue_name) {
                continue;
            }
            let batch_interval = match self.group_batch_intervals.get(queue_name) {
                Some(value) => seconds(&format!("group_batch_intervals.{}", queue_name), *value)?,
                None => default_policy.batch_interval,
            };
            let idle_timeout = match self.group_idle_timeouts.get(queue_name) {
                Some(value) => seconds(&format!("group_idle_timeouts.{}", queue_name), *value)?,
                None => default_policy.idle_timeout,
            };
            policies.insert(
                queue_name.clone(),
                QueuePolicy {
                    batch_interval,
                    idle_timeout,
                },
            );
        }

        let poll_interval = match self.poll_interval {
            Some(value) => seconds("poll_interval", value)?.max(MIN_POLL_INTERVAL),
            None => derive_poll_interval(default_policy, policies.values().copied()),
        };

        Ok(ResolvedConfig {
            namespace: self.namespace.clone(),
            batch_size,
            max_buffer_size_per_queue: self.max_buffer_size_per_queue,
            max_retry_attempts: self.max_retry_attempts,
            retry_base_delay: seconds("retry_base_delay", self.retry_base_delay)?,
            retry_max_delay: seconds("retry_max_delay", self.retry_max_delay)?,
            retry_jitter_factor: self.retry_jitter_factor,
            batch_byte_budget,
            max_entry_bytes,
            poll_interval,
            send_timeout: seconds("send_timeout", self.send_timeout)?,
            shutdown_timeout: seconds("shutdown_timeout", self.shutdown_timeout)?,
            default_policy,
            policies,
        })
    }
}

/// Smallest non-zero interval or timeout across all policies, clamped.
fn derive_poll_interval(
    default_policy: QueuePolicy,
    overrides: impl Iterator<Item = QueuePolicy>,
) -> Duration {
    std::iter::once(default_policy)
        .chain(overrides)
        .flat_map(|policy| [policy.batch_interval, policy.idle_timeout])
        .filter(|d| !d.is_zero())
        .min()
        .unwrap_or(MIN_POLL_INTERVAL)
        .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}
