//! Application configuration management.
//!
//! Handles loading, saving, and accessing client configuration: server URL,
//! HTTP retry policy, socket reconnection, telemetry batching, logging, and
//! storage location. Configuration is persisted as TOML on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{HdError, HdResult};

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// HTTP retry policy defaults.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Realtime socket settings.
    #[serde(default)]
    pub socket: SocketConfig,

    /// Telemetry batching and recovery settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Durable storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Backend base URL (e.g. "https://api.huddle.app").
    #[serde(default)]
    pub address: String,

    /// API request timeout in milliseconds.
    #[serde(default = "default_api_timeout")]
    pub api_timeout_ms: u64,

    /// Custom HTTP headers as key-value pairs.
    #[serde(default)]
    pub custom_headers: std::collections::HashMap<String, String>,
}

/// HTTP retry policy defaults applied when a call does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per request (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between retries in milliseconds (doubles each attempt).
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

/// Realtime socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Window for a connect attempt to resolve, in milliseconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,

    /// Base reconnection delay in milliseconds.
    #[serde(default = "default_base_delay")]
    pub reconnect_base_delay_ms: u64,

    /// Reconnection delay cap in milliseconds.
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u64,

    /// Maximum reconnection attempts before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

/// Telemetry batching and corruption-recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Master switch. Consent stored in the key-value store still applies.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of events that triggers an automatic flush, and sub-batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Periodic flush interval in milliseconds.
    #[serde(default = "default_batch_interval")]
    pub batch_interval_ms: u64,

    /// Maximum in-memory/persisted queue length (oldest evicted first).
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Invalid fraction above which the stored queue is discarded at load.
    #[serde(default = "default_load_discard_fraction")]
    pub load_discard_fraction: f64,

    /// Invalid fraction above which the queue is discarded before first flush.
    #[serde(default = "default_flush_discard_fraction")]
    pub flush_discard_fraction: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses the default data location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output for the file layer.
    #[serde(default)]
    pub json_output: bool,
}

/// Durable storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite store. If empty, uses the default data location.
    #[serde(default)]
    pub path: String,
}

// Default value functions for serde

fn default_api_timeout() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_connection_timeout() -> u64 {
    20_000
}

fn default_reconnect_max_delay() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_interval() -> u64 {
    30_000
}

fn default_max_queue_size() -> usize {
    500
}

fn default_load_discard_fraction() -> f64 {
    0.5
}

fn default_flush_discard_fraction() -> f64 {
    0.3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            retry: RetryConfig::default(),
            socket: SocketConfig::default(),
            telemetry: TelemetryConfig::default(),
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            api_timeout_ms: default_api_timeout(),
            custom_headers: std::collections::HashMap::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: default_connection_timeout(),
            reconnect_base_delay_ms: default_base_delay(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: default_batch_size(),
            batch_interval_ms: default_batch_interval(),
            max_queue_size: default_max_queue_size(),
            load_discard_fraction: default_load_discard_fraction(),
            flush_discard_fraction: default_flush_discard_fraction(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: String::new() }
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> HdResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> HdResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| HdError::Config(format!("failed to read config: {e}")))?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> HdResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HdError::Config(format!("failed to create config dir: {e}")))?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| HdError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)
            .map_err(|e| HdError::Config(format!("failed to write config: {e}")))?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> HdResult<PathBuf> {
        Ok(Self::data_dir()?.join("config.toml"))
    }

    /// Platform data directory for config, logs, and the SQLite store.
    pub fn data_dir() -> HdResult<PathBuf> {
        dirs::data_dir()
            .map(|d| d.join("huddle"))
            .ok_or_else(|| HdError::Config("no platform data directory".into()))
    }

    /// Get the effective storage path, using the configured path or the default.
    pub fn effective_storage_path(&self) -> HdResult<PathBuf> {
        if self.storage.path.is_empty() {
            Ok(Self::data_dir()?.join("huddle.db"))
        } else {
            Ok(PathBuf::from(&self.storage.path))
        }
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> HdResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(Self::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether the server connection is configured.
    pub fn is_server_configured(&self) -> bool {
        !self.server.address.is_empty()
    }

    /// Sanitize and normalize a server address.
    ///
    /// Ensures the address has a scheme and strips trailing slashes.
    pub fn sanitize_server_address(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access across components.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.api_timeout_ms, 30_000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.telemetry.batch_size, 10);
        assert!((config.telemetry.load_discard_fraction - 0.5).abs() < f64::EPSILON);
        assert!((config.telemetry.flush_discard_fraction - 0.3).abs() < f64::EPSILON);
        assert!(!config.is_server_configured());
    }

    #[test]
    fn test_sanitize_server_address() {
        assert_eq!(
            AppConfig::sanitize_server_address("api.huddle.app"),
            "https://api.huddle.app"
        );
        assert_eq!(
            AppConfig::sanitize_server_address("http://192.168.1.100:3000/"),
            "http://192.168.1.100:3000"
        );
        assert_eq!(
            AppConfig::sanitize_server_address("  \"https://api.huddle.app/\"  "),
            "https://api.huddle.app"
        );
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = AppConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(
            deserialized.socket.reconnect_max_delay_ms,
            config.socket.reconnect_max_delay_ms
        );
        assert_eq!(deserialized.telemetry.max_queue_size, config.telemetry.max_queue_size);
    }

    #[test]
    fn test_load_save_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.server.address = "https://api.huddle.app".into();
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.server.address, "https://api.huddle.app");
        assert!(loaded.is_server_configured());
    }

    #[tokio::test]
    async fn test_config_handle() {
        let handle = ConfigHandle::new(AppConfig::default());
        handle.write().await.server.address = "https://api.huddle.app".into();
        assert!(handle.read().await.is_server_configured());
    }
}
