//! Executor configuration.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism |
//! | `thread_name_prefix` | `"thunkrt-worker"` |
//! | `rendezvous_timeout` | 40 s |
//! | `rendezvous_warn_after` | 10 s |
//! | `transitive_reduction` | true |
//! | `verify_footprints` | true in debug builds |
//! | `shutdown_timeout` | 5 s |
//!
//! Use [`ExecutorConfig::from_env`] to layer `THUNKRT_*` environment
//! variables on top of the defaults.

use std::time::Duration;

use crate::runtime::env_config::{apply_env_overrides, ConfigError};

const DEFAULT_THREAD_NAME_PREFIX: &str = "thunkrt-worker";

/// Runtime knobs for the executor, worker pool and rendezvous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Number of worker pool threads.
    pub worker_threads: usize,
    /// Name prefix for worker pool threads.
    pub thread_name_prefix: String,
    /// How long a collective waits for all participants before failing.
    pub rendezvous_timeout: Duration,
    /// When to log a warning about a slow rendezvous.
    pub rendezvous_warn_after: Duration,
    /// Drop dependency edges already implied by other edges.
    pub transitive_reduction: bool,
    /// Check at launch time that no running operation conflicts.
    pub verify_footprints: bool,
    /// Upper bound on draining the worker pool at shutdown.
    pub shutdown_timeout: Duration,
}

impl ExecutorConfig {
    /// Clamp values into their valid ranges.
    pub fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
        if self.rendezvous_timeout.is_zero() {
            self.rendezvous_timeout = Duration::from_millis(1);
        }
        if self.rendezvous_warn_after > self.rendezvous_timeout {
            self.rendezvous_warn_after = self.rendezvous_timeout;
        }
    }

    /// Defaults overridden by any `THUNKRT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        config.normalize();
        Ok(config)
    }

    /// Defaults, then the TOML file, then environment variables.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let toml = crate::runtime::env_config::parse_toml_file(path)?;
        crate::runtime::env_config::apply_toml_config(&mut config, &toml);
        apply_env_overrides(&mut config)?;
        config.normalize();
        Ok(config)
    }

    /// Sets the worker thread count.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    /// Sets the rendezvous timeout.
    #[must_use]
    pub fn rendezvous_timeout(mut self, timeout: Duration) -> Self {
        self.rendezvous_timeout = timeout;
        self
    }

    /// Sets the slow-rendezvous warning threshold.
    #[must_use]
    pub fn rendezvous_warn_after(mut self, after: Duration) -> Self {
        self.rendezvous_warn_after = after;
        self
    }

    /// Enables or disables transitive reduction of the dependency graph.
    #[must_use]
    pub fn transitive_reduction(mut self, enabled: bool) -> Self {
        self.transitive_reduction = enabled;
        self
    }

    /// Enables or disables launch-time footprint verification.
    #[must_use]
    pub fn verify_footprints(mut self, enabled: bool) -> Self {
        self.verify_footprints = enabled;
        self
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            rendezvous_timeout: Duration::from_secs(40),
            rendezvous_warn_after: Duration::from_secs(10),
            transitive_reduction: true,
            verify_footprints: cfg!(debug_assertions),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_values() {
        let mut config = ExecutorConfig {
            worker_threads: 0,
            thread_name_prefix: String::new(),
            rendezvous_timeout: Duration::from_secs(1),
            rendezvous_warn_after: Duration::from_secs(5),
            ..ExecutorConfig::default()
        };
        config.normalize();
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.thread_name_prefix, "thunkrt-worker");
        assert_eq!(config.rendezvous_warn_after, Duration::from_secs(1));
    }

    #[test]
    fn defaults_are_conservative() {
        let config = ExecutorConfig::default();
        assert_eq!(config.rendezvous_timeout, Duration::from_secs(40));
        assert!(config.transitive_reduction);
        assert!(config.worker_threads >= 1);
    }

    #[test]
    fn builder_methods_chain() {
        let config = ExecutorConfig::default()
            .worker_threads(3)
            .transitive_reduction(false)
            .verify_footprints(true);
        assert_eq!(config.worker_threads, 3);
        assert!(!config.transitive_reduction);
        assert!(config.verify_footprints);
    }
}
