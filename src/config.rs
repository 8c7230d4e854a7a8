//! Configuration types for the sync and delivery core.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a chime instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChimeConfig {
    /// Sync queue settings.
    pub sync: SyncConfig,
    /// Delivery routing and retry settings.
    pub delivery: DeliveryConfig,
    /// Background scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Remote backend settings.
    pub backend: BackendConfig,
}

/// Sync queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum remote submission attempts per queued mutation before it is
    /// moved to the failed-mutations list.
    pub max_retries: u32,
    /// Whether consecutive `update` mutations for the same entity are
    /// collapsed to the latest one before a drain pass.
    pub consolidate_updates: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            consolidate_updates: true,
        }
    }
}

/// Delivery routing and retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Base delay for delivery retries in seconds. Each subsequent retry
    /// doubles it (`base * 2^retry_count`).
    pub retry_backoff_base_secs: u64,
    /// Maximum delivery retries for one firing before it is abandoned.
    pub max_delivery_retries: u32,
    /// Fixed capacity of the execution log ring buffer.
    pub log_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_backoff_base_secs: 300,
            max_delivery_retries: 3,
            log_capacity: 100,
        }
    }
}

/// Background scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between scheduler ticks in seconds.
    pub tick_interval_secs: u64,
    /// Grace period in seconds after which an unacknowledged fired task is
    /// marked missed.
    pub missed_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            missed_grace_secs: 2 * 3600,
        }
    }
}

/// Remote backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the remote backend, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout in seconds. A timed-out request is treated
    /// exactly like a network failure, never as success.
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_owned(),
            request_timeout_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_are_stable() {
        let config = ChimeConfig::default();
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.delivery.retry_backoff_base_secs, 300);
        assert_eq!(config.delivery.log_capacity, 100);
        assert_eq!(config.scheduler.tick_interval_secs, 30);
        assert_eq!(config.scheduler.missed_grace_secs, 7200);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ChimeConfig =
            serde_json::from_str(r#"{"sync":{"max_retries":5}}"#).unwrap();
        assert_eq!(config.sync.max_retries, 5);
        assert!(config.sync.consolidate_updates);
        assert_eq!(config.delivery.max_delivery_retries, 3);
        assert_eq!(config.backend.request_timeout_secs, 10);
    }

    #[test]
    fn round_trips_through_json() {
        let config = ChimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: ChimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.delivery.retry_backoff_base_secs, 300);
    }
}
