//! # Dispatcher Configuration
//!
//! Explicit, validated configuration for the dispatch core. Values come
//! from programmatic defaults, an optional config file, and `EVENTBUS_*`
//! environment overrides, in that order. No silent fallbacks at use sites:
//! everything the dispatcher reads is resolved once at construction.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use eventbus_core::config::DispatcherConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DispatcherConfig::load()?;
//! let pool_size = config.pool.size;
//! let default_timeout = config.default_timeout();
//! # Ok(())
//! # }
//! ```

use crate::error::{BusResult, DispatchError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded tokio worker pool for POOLED execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent pooled attempts
    pub size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { size: 4 }
    }
}

/// Child-process worker pool for ISOLATED execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolatedPoolConfig {
    /// Maximum concurrent worker processes
    pub size: usize,

    /// Worker command line (program + args). The worker must speak the
    /// line-delimited JSON protocol served by `isolated::worker_main`.
    /// Empty means ISOLATED submissions fail with an isolation fault.
    pub worker_command: Vec<String>,
}

impl Default for IsolatedPoolConfig {
    fn default() -> Self {
        Self {
            size: 2,
            worker_command: Vec::new(),
        }
    }
}

/// Optional delay between failed attempts. Disabled by default: the base
/// contract retries immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBackoffConfig {
    pub enabled: bool,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryBackoffConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryBackoffConfig {
    /// Delay before the given attempt number (attempt 2 is the first retry).
    pub fn delay_before_attempt(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        let retries_so_far = attempt.saturating_sub(1).max(1) - 1;
        let delay = self.base_delay_ms as f64 * self.multiplier.powi(retries_so_far as i32);
        Some(Duration::from_millis(
            (delay as u64).min(self.max_delay_ms),
        ))
    }
}

/// Root dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Default per-attempt timeout applied by `Dispatcher::event_builder`
    pub default_timeout_seconds: f64,

    /// Default retry budget applied by `Dispatcher::event_builder`
    pub default_retry_budget: u32,

    /// How long `shutdown` waits for in-flight work before force-failing it
    pub shutdown_grace_ms: u64,

    /// Capacity of the lifecycle broadcast channel
    pub lifecycle_channel_capacity: usize,

    pub pool: PoolConfig,
    pub isolated: IsolatedPoolConfig,
    pub backoff: RetryBackoffConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 30.0,
            default_retry_budget: 0,
            shutdown_grace_ms: 5_000,
            lifecycle_channel_capacity: 1_000,
            pool: PoolConfig::default(),
            isolated: IsolatedPoolConfig::default(),
            backoff: RetryBackoffConfig::default(),
        }
    }
}

impl DispatcherConfig {
    /// Load configuration: defaults, then the file named by
    /// `EVENTBUS_CONFIG` (if set), then `EVENTBUS_*` environment variables
    /// (nested keys separated by `__`, e.g. `EVENTBUS_POOL__SIZE=8`).
    pub fn load() -> BusResult<Self> {
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&DispatcherConfig::default()).map_err(|e| {
                DispatchError::Configuration {
                    reason: format!("failed to seed defaults: {e}"),
                }
            })?,
        );

        if let Ok(path) = std::env::var("EVENTBUS_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("EVENTBUS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| DispatchError::Configuration {
                reason: format!("failed to build configuration: {e}"),
            })?;

        let config: DispatcherConfig =
            settings
                .try_deserialize()
                .map_err(|e| DispatchError::Configuration {
                    reason: format!("failed to deserialize configuration: {e}"),
                })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the dispatcher cannot run with.
    pub fn validate(&self) -> BusResult<()> {
        if self.pool.size == 0 {
            return Err(DispatchError::Configuration {
                reason: "pool.size must be greater than 0".to_string(),
            });
        }
        if self.isolated.size == 0 {
            return Err(DispatchError::Configuration {
                reason: "isolated.size must be greater than 0".to_string(),
            });
        }
        if self.default_timeout_seconds <= 0.0 {
            return Err(DispatchError::Configuration {
                reason: "default_timeout_seconds must be greater than 0".to_string(),
            });
        }
        if self.backoff.enabled && self.backoff.multiplier < 1.0 {
            return Err(DispatchError::Configuration {
                reason: "backoff.multiplier must be at least 1.0".to_string(),
            });
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.default_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests that read or set EVENTBUS_* variables must not interleave.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_valid() {
        let config = DispatcherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let config = DispatcherConfig {
            pool: PoolConfig { size: 0 },
            ..DispatcherConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            DispatchError::Configuration { .. }
        ));
    }

    #[test]
    fn zero_default_timeout_is_rejected() {
        let config = DispatcherConfig {
            default_timeout_seconds: 0.0,
            ..DispatcherConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_without_file_or_env_yields_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("EVENTBUS_CONFIG");

        let config = DispatcherConfig::load().unwrap();
        assert_eq!(config.pool.size, PoolConfig::default().size);
        assert_eq!(config.isolated.size, IsolatedPoolConfig::default().size);
        assert!(config.isolated.worker_command.is_empty());
        assert_eq!(config.default_retry_budget, 0);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eventbus.toml");
        std::fs::write(
            &path,
            "default_retry_budget = 4\n[pool]\nsize = 9\n",
        )
        .unwrap();

        std::env::set_var("EVENTBUS_CONFIG", path.to_str().unwrap());
        let config = DispatcherConfig::load().unwrap();
        std::env::remove_var("EVENTBUS_CONFIG");

        assert_eq!(config.default_retry_budget, 4);
        assert_eq!(config.pool.size, 9);
        // Untouched sections keep their defaults.
        assert_eq!(config.isolated.size, 2);
    }

    #[test]
    fn backoff_disabled_yields_no_delay() {
        let backoff = RetryBackoffConfig::default();
        assert_eq!(backoff.delay_before_attempt(2), None);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = RetryBackoffConfig {
            enabled: true,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 350,
        };
        // First retry (attempt 2): base delay.
        assert_eq!(
            backoff.delay_before_attempt(2),
            Some(Duration::from_millis(100))
        );
        // Second retry doubles.
        assert_eq!(
            backoff.delay_before_attempt(3),
            Some(Duration::from_millis(200))
        );
        // Capped at max_delay_ms.
        assert_eq!(
            backoff.delay_before_attempt(4),
            Some(Duration::from_millis(350))
        );
    }
}
