//! Tunable transfer and directory policy. Every field has a default so hosts can
//! deserialize a partial TOML/JSON table.

use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Largest file an offer may declare unless overridden (4 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Sender/receiver policy for one transfer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferConfig {
    /// Offers above this size are rejected as `FileTooLarge`.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Channel re-open attempts after `failed` before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Throughput sampling cadence for adaptive concurrency.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// No chunk completed for this long while work remains: stalled.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    /// A single chunk stuck in processing for this long: stalled.
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    /// Bound on encoded bytes in flight plus bytes queued in the channel.
    #[serde(default = "default_max_in_flight_bytes")]
    pub max_in_flight_bytes: u64,
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    1_000
}
fn default_retry_max_ms() -> u64 {
    16_000
}
fn default_sample_interval_ms() -> u64 {
    500
}
fn default_stall_timeout_secs() -> u64 {
    30
}
fn default_chunk_timeout_secs() -> u64 {
    15
}
fn default_max_in_flight_bytes() -> u64 {
    4 * 1024 * 1024
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            sample_interval_ms: default_sample_interval_ms(),
            stall_timeout_secs: default_stall_timeout_secs(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            max_in_flight_bytes: default_max_in_flight_bytes(),
        }
    }
}

impl TransferConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
        }
    }

    pub fn sample_interval(&self) -> Duration {
        // A zero interval would make tokio's interval panic.
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }
}

/// Session directory lifetime policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryConfig {
    /// Sessions untouched for this long are expired by the sweep (default 10 minutes).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Sweep cadence (default 60 s).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_idle_timeout_secs() -> u64 {
    600
}
fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl DirectoryConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_table_keeps_defaults() {
        let c: TransferConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(c.max_retries, 5);
        assert_eq!(c.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(c.sample_interval(), Duration::from_millis(500));
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(serde_json::from_str::<DirectoryConfig>(r#"{"idle": 1}"#).is_err());
    }

    #[test]
    fn retry_policy_from_config() {
        let c = TransferConfig::default();
        let p = c.retry_policy();
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn directory_defaults() {
        let d = DirectoryConfig::default();
        assert_eq!(d.idle_timeout(), Duration::from_secs(600));
        assert_eq!(d.sweep_interval(), Duration::from_secs(60));
    }
}
