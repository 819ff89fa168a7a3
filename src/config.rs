//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::now_ms;
use crate::error::{CacheError, Result};

/// Default heartbeat timeout in milliseconds
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 1000;

/// Default maximum entry lifetime in milliseconds (7 days)
pub const DEFAULT_MAX_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Default queue directory polling interval in milliseconds
pub const DEFAULT_QUEUE_POLL_MS: u64 = 20;

/// Longest process id; it is embedded in heartbeat, ticket and temp file names
pub const MAX_PROCESS_ID_LENGTH: usize = 128;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Back the cache with the shared on-disk store
    pub use_file_cache: bool,
    /// Keep a process-local in-memory copy of values
    pub use_mem_cache: bool,
    /// Root of the shared `proc/`, `queue/` and `data/` areas
    pub workdir: PathBuf,
    /// Identity of this process in heartbeat, ticket and data files
    pub process_id: String,
    /// Heartbeat age in milliseconds after which a process is considered dead
    pub heartbeat_timeout: u64,
    /// Lifetime in milliseconds of entries stored without a TTL
    pub max_ttl: u64,
    /// Interval in milliseconds between scans of the queue area
    pub queue_poll_interval: u64,
    /// HTTP server port (binary only)
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_USE_FILE` - Enable the shared file cache (default: false)
    /// - `CACHE_USE_MEM` - Enable the in-memory cache (default: true)
    /// - `CACHE_WORKDIR` - Shared work directory (default: `<tmp>/dual_cache`)
    /// - `CACHE_PROCESS_ID` - Process identity (default: `<now_ms>_<pid>`)
    /// - `CACHE_HEARTBEAT_TIMEOUT_MS` - Heartbeat timeout (default: 1000)
    /// - `CACHE_MAX_TTL_MS` - Maximum entry lifetime (default: 7 days)
    /// - `CACHE_QUEUE_POLL_MS` - Queue scan interval (default: 20)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            use_file_cache: env::var("CACHE_USE_FILE")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.use_file_cache),
            use_mem_cache: env::var("CACHE_USE_MEM")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.use_mem_cache),
            workdir: env::var("CACHE_WORKDIR")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.workdir),
            process_id: env::var("CACHE_PROCESS_ID")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.process_id),
            heartbeat_timeout: env::var("CACHE_HEARTBEAT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.heartbeat_timeout),
            max_ttl: env::var("CACHE_MAX_TTL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_ttl),
            queue_poll_interval: env::var("CACHE_QUEUE_POLL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.queue_poll_interval),
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
        }
    }

    /// Enables the shared file cache rooted at `workdir`.
    pub fn with_file_cache(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.use_file_cache = true;
        self.workdir = workdir.into();
        self
    }

    pub fn with_mem_cache(mut self, enabled: bool) -> Self {
        self.use_mem_cache = enabled;
        self
    }

    pub fn with_process_id(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = process_id.into();
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_ttl(mut self, max_ttl: Duration) -> Self {
        self.max_ttl = max_ttl.as_millis() as u64;
        self
    }

    pub fn with_queue_poll_interval(mut self, interval: Duration) -> Self {
        self.queue_poll_interval = interval.as_millis() as u64;
        self
    }

    /// Period at which the heartbeat file is refreshed.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout / 3)
    }

    /// Checks the values that end up embedded in shared filenames or timers.
    pub fn validate(&self) -> Result<()> {
        if self.process_id.is_empty()
            || !self
                .process_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            || self.process_id.len() > MAX_PROCESS_ID_LENGTH
        {
            return Err(CacheError::InvalidConfig(format!(
                "process_id '{}' must be 1 to {} characters of [A-Za-z0-9_]",
                self.process_id, MAX_PROCESS_ID_LENGTH
            )));
        }
        if self.heartbeat_timeout < 3 {
            return Err(CacheError::InvalidConfig(
                "heartbeat_timeout must be at least 3 ms".to_string(),
            ));
        }
        if self.max_ttl == 0 {
            return Err(CacheError::InvalidConfig(
                "max_ttl must be positive".to_string(),
            ));
        }
        if self.queue_poll_interval == 0 {
            return Err(CacheError::InvalidConfig(
                "queue_poll_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_file_cache: false,
            use_mem_cache: true,
            workdir: env::temp_dir().join("dual_cache"),
            process_id: default_process_id(),
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            max_ttl: DEFAULT_MAX_TTL_MS,
            queue_poll_interval: DEFAULT_QUEUE_POLL_MS,
            server_port: 3000,
        }
    }
}

/// Identity unique per process: start timestamp plus OS process id.
pub fn default_process_id() -> String {
    format!("{}_{}", now_ms(), std::process::id())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
