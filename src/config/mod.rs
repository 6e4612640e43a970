/// Configuration management for the flowgate server
///
/// Handles server configuration, database location, activation batching and
/// retry timing, admission control caps and the instance role.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Startup activation settings
    pub workflows: WorkflowsConfig,
    /// Re-activation backoff
    pub activation: ActivationConfig,
    /// Admission control
    pub concurrency: ConcurrencyConfig,
    /// Role of this instance in a (possibly) multi-instance deployment
    pub instance: InstanceConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// SQLite storage location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding `flowgate.db` (default: "data")
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowsConfig {
    /// How many workflows are activated in parallel on startup
    pub activation_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// First retry delay after a failed activation
    pub reactivate_initial_timeout_ms: u64,
    /// Upper bound for the doubling retry delay
    pub reactivate_max_timeout_ms: u64,
}

impl ActivationConfig {
    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.reactivate_initial_timeout_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.reactivate_max_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Max concurrent production executions; negative disables, 0 is rejected
    pub production_cap: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Whether several main instances share the same storage
    pub multi_main: bool,
    /// Initial leadership; single-instance deployments are always leader
    pub leader: bool,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("FLOWGATE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("FLOWGATE_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("FLOWGATE_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            },
            workflows: WorkflowsConfig {
                activation_batch_size: env_or("FLOWGATE_ACTIVATION_BATCH_SIZE", 1),
            },
            activation: ActivationConfig {
                reactivate_initial_timeout_ms: env_or("FLOWGATE_REACTIVATE_INITIAL_TIMEOUT_MS", 1_000),
                reactivate_max_timeout_ms: env_or("FLOWGATE_REACTIVATE_MAX_TIMEOUT_MS", 24 * 60 * 60 * 1_000),
            },
            concurrency: ConcurrencyConfig {
                production_cap: env_or("FLOWGATE_CONCURRENCY_PRODUCTION_LIMIT", -1),
            },
            instance: InstanceConfig {
                multi_main: env_or("FLOWGATE_MULTI_MAIN", false),
                leader: env_or("FLOWGATE_LEADER", true),
            },
        }
    }
}

/// Parse an environment variable, falling back when unset or malformed
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
