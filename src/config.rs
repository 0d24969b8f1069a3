//! Client and pool configuration
//!
//! Loaded once at startup (usually from JSON) and shared read-only afterwards.
//! Timeouts and intervals are expressed in milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FtpError, Result};
use crate::types::TransferFileType;

fn default_port() -> u16 {
    21
}

fn default_username() -> String {
    "anonymous".to_string()
}

fn default_passive_mode() -> bool {
    true
}

fn default_encoding() -> String {
    "UTF-8".to_string()
}

fn default_connect_timeout() -> u64 {
    10 * 1000
}

fn default_data_timeout() -> u64 {
    300 * 1000
}

fn default_so_timeout() -> u64 {
    3 * 1000
}

fn default_buffer_size() -> usize {
    1024 * 1024
}

/// Connection settings for every session the pool creates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpClientConfig {
    /// Server host name or address
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Enter local passive mode after login
    #[serde(default = "default_passive_mode")]
    pub passive_mode: bool,

    /// Control channel encoding
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Data channel timeout in milliseconds
    #[serde(default = "default_data_timeout")]
    pub data_timeout: u64,

    /// Control socket read timeout in milliseconds
    #[serde(default = "default_so_timeout")]
    pub so_timeout: u64,

    /// Transfer buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default)]
    pub transfer_file_type: TransferFileType,

    /// Fail session creation when the server rejects the login.
    ///
    /// Off by default: a rejected login only logs a warning and the session
    /// joins the pool unauthenticated, so later operations fail their
    /// readiness check instead.
    #[serde(default)]
    pub strict_login: bool,

    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for FtpClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: default_username(),
            password: String::new(),
            passive_mode: default_passive_mode(),
            encoding: default_encoding(),
            connect_timeout: default_connect_timeout(),
            data_timeout: default_data_timeout(),
            so_timeout: default_so_timeout(),
            buffer_size: default_buffer_size(),
            transfer_file_type: TransferFileType::default(),
            strict_login: false,
            pool: PoolConfig::default(),
        }
    }
}

impl FtpClientConfig {
    /// Creates a configuration for `host` with default values everywhere else
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FtpError::config(format!("invalid FTP client config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FtpError::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(FtpError::config("host is required"));
        }
        if self.buffer_size == 0 {
            return Err(FtpError::config("bufferSize must be greater than 0"));
        }
        self.pool.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_millis(self.data_timeout)
    }

    pub fn so_timeout(&self) -> Duration {
        Duration::from_millis(self.so_timeout)
    }
}

fn default_max_total() -> usize {
    8
}

fn default_max_idle() -> usize {
    8
}

fn default_min_evictable_idle_time() -> Option<u64> {
    Some(30 * 60 * 1000)
}

fn default_true() -> bool {
    true
}

/// Sizing and eviction knobs for the session pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Maximum number of sessions, borrowed and idle together
    #[serde(default = "default_max_total")]
    pub max_total: usize,

    /// Maximum number of idle sessions kept on return
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// Idle floor the evictor refills towards
    #[serde(default)]
    pub min_idle: usize,

    /// Borrow wait bound in milliseconds; absent means wait forever
    #[serde(default)]
    pub max_wait: Option<u64>,

    /// Evictor period in milliseconds; absent disables the evictor
    #[serde(default)]
    pub time_between_eviction_runs: Option<u64>,

    /// Idle age in milliseconds after which the evictor destroys a session
    #[serde(default = "default_min_evictable_idle_time")]
    pub min_evictable_idle_time: Option<u64>,

    #[serde(default = "default_true")]
    pub test_on_borrow: bool,

    #[serde(default)]
    pub test_on_return: bool,

    #[serde(default = "default_true")]
    pub test_while_idle: bool,

    /// Hand out the most recently returned session first
    #[serde(default = "default_true")]
    pub lifo: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: default_max_total(),
            max_idle: default_max_idle(),
            min_idle: 0,
            max_wait: None,
            time_between_eviction_runs: None,
            min_evictable_idle_time: default_min_evictable_idle_time(),
            test_on_borrow: true,
            test_on_return: false,
            test_while_idle: true,
            lifo: true,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_total == 0 {
            return Err(FtpError::config("maxTotal must be greater than 0"));
        }
        if self.time_between_eviction_runs == Some(0) {
            return Err(FtpError::config(
                "timeBetweenEvictionRuns must be greater than 0",
            ));
        }
        Ok(())
    }

    /// `max_idle`, capped by `max_total`
    pub fn effective_max_idle(&self) -> usize {
        self.max_idle.min(self.max_total)
    }

    /// `min_idle`, capped by the effective `max_idle`
    pub fn effective_min_idle(&self) -> usize {
        self.min_idle.min(self.effective_max_idle())
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait.map(Duration::from_millis)
    }

    pub fn time_between_eviction_runs(&self) -> Option<Duration> {
        self.time_between_eviction_runs.map(Duration::from_millis)
    }

    pub fn min_evictable_idle_time(&self) -> Option<Duration> {
        self.min_evictable_idle_time.map(Duration::from_millis)
    }

    /// Sets the maximum number of sessions
    pub fn with_max_total(mut self, max: usize) -> Self {
        self.max_total = max;
        self
    }

    pub fn with_max_idle(mut self, max: usize) -> Self {
        self.max_idle = max;
        self
    }

    pub fn with_min_idle(mut self, min: usize) -> Self {
        self.min_idle = min;
        self
    }

    /// Sets the borrow wait bound
    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = Some(wait.as_millis() as u64);
        self
    }

    /// Enables the background evictor
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.time_between_eviction_runs = Some(interval.as_millis() as u64);
        self
    }

    pub fn with_test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    pub fn with_test_on_return(mut self, enabled: bool) -> Self {
        self.test_on_return = enabled;
        self
    }
}
