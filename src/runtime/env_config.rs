//! Environment variable and config file support for [`ExecutorConfig`].
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables**: values from `THUNKRT_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`ExecutorConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `THUNKRT_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `THUNKRT_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `THUNKRT_RENDEZVOUS_TIMEOUT_MS` | `u64` | `rendezvous_timeout` |
//! | `THUNKRT_RENDEZVOUS_WARN_MS` | `u64` | `rendezvous_warn_after` |
//! | `THUNKRT_TRANSITIVE_REDUCTION` | `bool` | `transitive_reduction` |
//! | `THUNKRT_VERIFY_FOOTPRINTS` | `bool` | `verify_footprints` |

use std::time::Duration;

use crate::runtime::config::ExecutorConfig;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "THUNKRT_WORKER_THREADS";
/// Environment variable name for worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "THUNKRT_THREAD_NAME_PREFIX";
/// Environment variable name for the rendezvous timeout in milliseconds.
pub const ENV_RENDEZVOUS_TIMEOUT_MS: &str = "THUNKRT_RENDEZVOUS_TIMEOUT_MS";
/// Environment variable name for the slow-rendezvous warning in milliseconds.
pub const ENV_RENDEZVOUS_WARN_MS: &str = "THUNKRT_RENDEZVOUS_WARN_MS";
/// Environment variable name for the transitive reduction toggle.
pub const ENV_TRANSITIVE_REDUCTION: &str = "THUNKRT_TRANSITIVE_REDUCTION";
/// Environment variable name for the footprint verification toggle.
pub const ENV_VERIFY_FOOTPRINTS: &str = "THUNKRT_VERIFY_FOOTPRINTS";

/// Error produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable or field held an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable or field name.
        var: String,
        /// Description of the accepted values.
        expected: &'static str,
        /// The rejected raw value.
        value: String,
    },
    /// The config file could not be read.
    #[error("failed to read config file {path}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse TOML config: {0}")]
    Toml(String),
}

/// Apply environment variable overrides to an [`ExecutorConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut ExecutorConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_RENDEZVOUS_TIMEOUT_MS) {
        config.rendezvous_timeout = parse_millis(ENV_RENDEZVOUS_TIMEOUT_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_RENDEZVOUS_WARN_MS) {
        config.rendezvous_warn_after = parse_millis(ENV_RENDEZVOUS_WARN_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_TRANSITIVE_REDUCTION) {
        config.transitive_reduction = parse_bool(ENV_TRANSITIVE_REDUCTION, &val)?;
    }
    if let Some(val) = read_env(ENV_VERIFY_FOOTPRINTS) {
        config.verify_footprints = parse_bool(ENV_VERIFY_FOOTPRINTS, &val)?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn invalid(var_name: &str, expected: &'static str, val: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var_name.to_string(),
        expected,
        value: val.to_string(),
    }
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| invalid(var_name, "unsigned integer", val))
}

fn parse_millis(var_name: &str, val: &str) -> Result<Duration, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(var_name, "milliseconds as u64", val))
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(
            var_name,
            "bool (true/false/1/0/yes/no)",
            val,
        )),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable executor configuration.
///
/// ```toml
/// [executor]
/// worker_threads = 8
/// thread_name_prefix = "xla-cpu"
/// transitive_reduction = true
/// verify_footprints = false
///
/// [rendezvous]
/// timeout_ms = 40000
/// warn_after_ms = 10000
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ExecutorTomlConfig {
    /// Executor settings.
    #[serde(default)]
    pub executor: ExecutorToml,
    /// Rendezvous settings.
    #[serde(default)]
    pub rendezvous: RendezvousToml,
}

/// Executor section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ExecutorToml {
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
    /// Transitive reduction toggle.
    pub transitive_reduction: Option<bool>,
    /// Footprint verification toggle.
    pub verify_footprints: Option<bool>,
}

/// Rendezvous section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RendezvousToml {
    /// Timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Warning threshold in milliseconds.
    pub warn_after_ms: Option<u64>,
}

/// Apply a parsed TOML config to an [`ExecutorConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut ExecutorConfig, toml: &ExecutorTomlConfig) {
    if let Some(v) = toml.executor.worker_threads {
        config.worker_threads = v;
    }
    if let Some(ref v) = toml.executor.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = toml.executor.transitive_reduction {
        config.transitive_reduction = v;
    }
    if let Some(v) = toml.executor.verify_footprints {
        config.verify_footprints = v;
    }
    if let Some(v) = toml.rendezvous.timeout_ms {
        config.rendezvous_timeout = Duration::from_millis(v);
    }
    if let Some(v) = toml.rendezvous.warn_after_ms {
        config.rendezvous_warn_after = Duration::from_millis(v);
    }
}

/// Parse a TOML string into an [`ExecutorTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<ExecutorTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Toml(e.to_string()))
}

/// Read and parse a TOML file into an [`ExecutorTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<ExecutorTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}
