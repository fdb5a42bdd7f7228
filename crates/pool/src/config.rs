// Pool configuration
//
// Built with `with_*` setters or loaded from environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineOptions;

/// Bound on each execution context's initialization handshake
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `destroy` waits for context threads to exit
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Validator pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of execution contexts (at least 1)
    pub pool_size: usize,

    /// Handshake timeout applied to every context during `init`
    #[serde(with = "duration_millis")]
    pub init_timeout: Duration,

    /// Grace period for context threads to exit on `destroy`
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// Options every context's engine is built with
    pub engine: EngineOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            init_timeout: DEFAULT_INIT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            engine: EngineOptions::default(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SCHEMAWORKS_POOL_SIZE`: number of execution contexts (default: host parallelism)
    /// - `SCHEMAWORKS_INIT_TIMEOUT_MS`: handshake timeout (default: 10000)
    /// - `SCHEMAWORKS_SHUTDOWN_TIMEOUT_MS`: teardown grace period (default: 5000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let pool_size = env::var("SCHEMAWORKS_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .map(|size| size.max(1))
            .unwrap_or(defaults.pool_size);

        let init_timeout = env::var("SCHEMAWORKS_INIT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.init_timeout);

        let shutdown_timeout = env::var("SCHEMAWORKS_SHUTDOWN_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.shutdown_timeout);

        Self {
            pool_size,
            init_timeout,
            shutdown_timeout,
            engine: defaults.engine,
        }
    }

    /// Set the number of execution contexts
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Set the handshake timeout
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Set the teardown grace period
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the engine options
    pub fn with_engine_options(mut self, options: EngineOptions) -> Self {
        self.engine = options;
        self
    }
}

/// Host parallelism, never less than one
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
