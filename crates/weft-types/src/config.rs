//! Engine configuration types.
//!
//! `EngineConfig` is the `weft.toml` file that sets run defaults: timeouts,
//! retry policy, cache TTL and event buffering. All fields have defaults, so
//! an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::workflow::{
    DEFAULT_GLOBAL_TIMEOUT_SECS, DEFAULT_STEP_TIMEOUT_SECS, ExecutionOptions, RetryPolicy,
};

/// Default number of buffered events per subscriber before the oldest are dropped.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Default maximum number of cached step results.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1024;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

impl EngineConfig {
    /// Build per-run options from the configured defaults. A zero step
    /// timeout is raised to one second.
    pub fn to_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            global_timeout: Duration::from_secs(self.execution.global_timeout_secs),
            per_step_timeout: Duration::from_secs(self.execution.step_timeout_secs.max(1)),
            continue_on_error: self.execution.continue_on_error,
            retry_policy: self.retry.clone(),
            cache_ttl: self.cache.ttl_secs.map(Duration::from_secs),
            max_parallelism: self.execution.max_parallelism,
            share_cache_across_runs: self.execution.share_cache_across_runs,
        }
    }
}

/// `[execution]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_global_timeout_secs")]
    pub global_timeout_secs: u64,
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallelism: Option<usize>,
    #[serde(default)]
    pub share_cache_across_runs: bool,
}

fn default_global_timeout_secs() -> u64 {
    DEFAULT_GLOBAL_TIMEOUT_SECS
}

fn default_step_timeout_secs() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            global_timeout_secs: default_global_timeout_secs(),
            step_timeout_secs: default_step_timeout_secs(),
            continue_on_error: false,
            max_parallelism: None,
            share_cache_across_runs: false,
        }
    }
}

/// `[cache]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime; absent disables caching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

fn default_cache_max_entries() -> usize {
    DEFAULT_CACHE_MAX_ENTRIES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: None,
            max_entries: default_cache_max_entries(),
        }
    }
}

/// `[events]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_buffer")]
    pub buffer: usize,
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer: default_event_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());

        let options = config.to_options();
        assert_eq!(options, ExecutionOptions::default());
    }

    #[test]
    fn test_config_with_values() {
        let toml_str = r#"
[execution]
global_timeout_secs = 60
continue_on_error = true
max_parallelism = 4

[retry]
max_attempts = 3
base_delay_ms = 200
backoff_multiplier = 1.5
jitter_ms = 50

[cache]
ttl_secs = 120
max_entries = 10

[events]
buffer = 64
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.execution.global_timeout_secs, 60);
        assert_eq!(config.execution.step_timeout_secs, DEFAULT_STEP_TIMEOUT_SECS);
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.events.buffer, 64);

        let options = config.to_options();
        assert_eq!(options.global_timeout, Duration::from_secs(60));
        assert!(options.continue_on_error);
        assert_eq!(options.max_parallelism, Some(4));
        assert_eq!(options.retry_policy.max_attempts, 3);
        assert_eq!(options.retry_policy.jitter(), Some(Duration::from_millis(50)));
        assert_eq!(options.cache_ttl, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_zero_step_timeout_is_clamped() {
        let config: EngineConfig = toml::from_str("[execution]\nstep_timeout_secs = 0\n").unwrap();
        assert_eq!(config.execution.step_timeout_secs, 0);
        assert_eq!(config.to_options().per_step_timeout, Duration::from_secs(1));
    }
}
