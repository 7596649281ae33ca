//! # Sync Configuration
//!
//! Configuration management for the request queue and sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FAIRWAY_API_URL=https://api.example.com                            │
//! │     FAIRWAY_DEVICE_ID=abc-123                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/fairway-pos/fairway-sync.toml (Linux)                    │
//! │     ~/Library/Application Support/com.fairway.pos/... (macOS)          │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     server-wins, 5 retries, 30 s sync interval                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Front Desk"
//!
//! [api]
//! base_url = "https://pos.example.com/api/"
//! timeout_ms = 10000
//! max_queue_size = 100
//! cache_capacity = 256
//!
//! [sync]
//! collections = ["bookings", "customers", "tabs"]
//! conflict_policy = "server-wins"
//! max_retries = 5
//! base_retry_delay_ms = 5000
//!
//! [storage]
//! data_dir = "/var/lib/fairway"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fairway_core::{CacheTtl, Collection, ConflictPolicy, RetryPolicy};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Front Desk", "Bar").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// API Settings
// =============================================================================

/// Request layer settings.
///
/// Each `*_ms`/`retry_attempts` default has a matching hard maximum; per-call
/// options are clamped to the maximum whatever the caller asks for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL relative request paths are joined to.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_timeout")]
    pub max_timeout_ms: u64,

    /// Attempts after the first one.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    /// Offline queue bound; the oldest entry is evicted beyond it.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Queued requests older than this are discarded on load.
    #[serde(default = "default_queue_retention")]
    pub queue_retention_ms: i64,

    #[serde(default = "default_cache_short")]
    pub cache_short_ms: u64,

    #[serde(default = "default_cache_medium")]
    pub cache_medium_ms: u64,

    #[serde(default = "default_cache_long")]
    pub cache_long_ms: u64,

    /// Most GET responses kept; the least recently used is evicted beyond it.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_timeout() -> u64 {
    10_000
}
fn default_max_timeout() -> u64 {
    30_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_max_retry_attempts() -> u32 {
    5
}
fn default_retry_delay() -> u64 {
    1_000
}
fn default_max_retry_delay() -> u64 {
    10_000
}
fn default_max_queue_size() -> usize {
    fairway_core::MAX_QUEUE_SIZE
}
fn default_queue_retention() -> i64 {
    fairway_core::QUEUE_RETENTION_MS
}
fn default_cache_short() -> u64 {
    30_000
}
fn default_cache_medium() -> u64 {
    5 * 60_000
}
fn default_cache_long() -> u64 {
    30 * 60_000
}
fn default_cache_capacity() -> usize {
    256
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: None,
            timeout_ms: default_timeout(),
            max_timeout_ms: default_max_timeout(),
            retry_attempts: default_retry_attempts(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            max_queue_size: default_max_queue_size(),
            queue_retention_ms: default_queue_retention(),
            cache_short_ms: default_cache_short(),
            cache_medium_ms: default_cache_medium(),
            cache_long_ms: default_cache_long(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl ApiSettings {
    /// Lifetime of a cache entry of the given class.
    pub fn ttl(&self, class: CacheTtl) -> Duration {
        let ms = match class {
            CacheTtl::Short => self.cache_short_ms,
            CacheTtl::Medium => self.cache_medium_ms,
            CacheTtl::Long => self.cache_long_ms,
        };
        Duration::from_millis(ms)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync engine behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Collections pulled by `sync_all`.
    #[serde(default = "default_collections")]
    pub collections: Vec<Collection>,

    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// Failed deliveries allowed before a change is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_retry_delay")]
    pub base_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_sync")]
    pub max_retry_delay_ms: u64,

    /// Upper bound of the random jitter, as a fraction of the delay.
    #[serde(default = "default_jitter")]
    pub jitter_ratio: f64,

    #[serde(default = "default_dead_letter_limit")]
    pub dead_letter_limit: usize,

    /// Interval between background sync cycles (seconds).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Open live feeds for every configured collection.
    #[serde(default)]
    pub realtime: bool,

    /// Poll interval of HTTP live feeds (seconds).
    #[serde(default = "default_realtime_poll")]
    pub realtime_poll_secs: u64,
}

fn default_collections() -> Vec<Collection> {
    ["bookings", "customers", "tabs"]
        .into_iter()
        .filter_map(|name| Collection::new(name).ok())
        .collect()
}
fn default_max_retries() -> u32 {
    5
}
fn default_base_retry_delay() -> u64 {
    5_000
}
fn default_max_retry_delay_sync() -> u64 {
    300_000
}
fn default_jitter() -> f64 {
    0.3
}
fn default_dead_letter_limit() -> usize {
    fairway_core::DEAD_LETTER_LIMIT
}
fn default_sync_interval() -> u64 {
    30
}
fn default_realtime_poll() -> u64 {
    15
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            collections: default_collections(),
            conflict_policy: ConflictPolicy::default(),
            max_retries: default_max_retries(),
            base_retry_delay_ms: default_base_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay_sync(),
            jitter_ratio: default_jitter(),
            dead_letter_limit: default_dead_letter_limit(),
            sync_interval_secs: default_sync_interval(),
            realtime: false,
            realtime_poll_secs: default_realtime_poll(),
        }
    }
}

impl SyncSettings {
    /// Backoff parameters for failed deliveries.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: self.base_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            jitter_ratio: self.jitter_ratio,
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Where the durable local store lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Data directory. Defaults to the platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete configuration for the request queue, sync engine and agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (fairway-sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::InvalidConfig("device.id must not be empty".into()));
        }

        if let Some(ref base) = self.api.base_url {
            let parsed = url::Url::parse(base)?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SyncError::InvalidUrl(format!(
                    "API URL must start with http:// or https://, got: {}",
                    base
                )));
            }
        }

        let api = &self.api;
        if api.timeout_ms == 0 || api.timeout_ms > api.max_timeout_ms {
            return Err(SyncError::InvalidConfig(format!(
                "api.timeout_ms must be in 1..={}",
                api.max_timeout_ms
            )));
        }
        if api.retry_attempts > api.max_retry_attempts {
            return Err(SyncError::InvalidConfig(format!(
                "api.retry_attempts must be at most {}",
                api.max_retry_attempts
            )));
        }
        if api.retry_delay_ms > api.max_retry_delay_ms {
            return Err(SyncError::InvalidConfig(format!(
                "api.retry_delay_ms must be at most {}",
                api.max_retry_delay_ms
            )));
        }
        if api.max_queue_size == 0 {
            return Err(SyncError::InvalidConfig(
                "api.max_queue_size must be greater than 0".into(),
            ));
        }
        if api.cache_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "api.cache_capacity must be greater than 0".into(),
            ));
        }

        let sync = &self.sync;
        if sync.base_retry_delay_ms > sync.max_retry_delay_ms {
            return Err(SyncError::InvalidConfig(
                "sync.base_retry_delay_ms must not exceed sync.max_retry_delay_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&sync.jitter_ratio) {
            return Err(SyncError::InvalidConfig(
                "sync.jitter_ratio must be between 0.0 and 1.0".into(),
            ));
        }
        if sync.dead_letter_limit == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.dead_letter_limit must be greater than 0".into(),
            ));
        }
        if sync.sync_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.sync_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("FAIRWAY_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(url) = std::env::var("FAIRWAY_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.api.base_url = Some(url);
        }

        if let Ok(secs) = std::env::var("FAIRWAY_SYNC_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.sync.sync_interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid FAIRWAY_SYNC_INTERVAL_SECS"),
            }
        }

        if let Ok(policy) = std::env::var("FAIRWAY_CONFLICT_POLICY") {
            match policy.parse() {
                Ok(parsed) => {
                    debug!(policy = %policy, "Overriding conflict policy from environment");
                    self.sync.conflict_policy = parsed;
                }
                Err(_) => warn!(policy = %policy, "Unknown conflict policy in environment"),
            }
        }

        if let Ok(dir) = std::env::var("FAIRWAY_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }

        if let Ok(retries) = std::env::var("FAIRWAY_MAX_RETRIES") {
            if let Ok(r) = retries.parse::<u32>() {
                self.sync.max_retries = r;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "fairway", "pos")
            .map(|dirs| dirs.config_dir().join("fairway-sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the API base URL if configured.
    pub fn api_url(&self) -> Option<&str> {
        self.api.base_url.as_deref()
    }

    /// Resolved data directory for the file store.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.storage.data_dir.clone().or_else(|| {
            directories::ProjectDirs::from("com", "fairway", "pos")
                .map(|dirs| dirs.data_dir().to_path_buf())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.device.id.is_empty());
        assert_eq!(config.sync.conflict_policy, ConflictPolicy::ServerWins);
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.base_retry_delay_ms, 5_000);
        assert_eq!(config.api.max_queue_size, 100);
        assert_eq!(config.api.cache_capacity, 256);
        assert_eq!(config.api.ttl(CacheTtl::Short), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.device.id = String::new();
        assert!(config.validate().is_err());

        config.device.id = "test".to_string();
        config.api.base_url = Some("ws://invalid".to_string());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.api.base_url = Some("https://pos.example.com/api/".to_string());
        assert!(config.validate().is_ok());

        config.api.timeout_ms = 60_000;
        assert!(config.validate().is_err());
        config.api.timeout_ms = 10_000;

        config.api.cache_capacity = 0;
        assert!(config.validate().is_err());
        config.api.cache_capacity = 64;

        config.sync.jitter_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [device]
            id = "front-desk"

            [sync]
            collections = ["bookings"]
            conflict_policy = "merge"
            "#,
        )
        .unwrap();

        assert_eq!(config.device.name, "POS Terminal");
        assert_eq!(config.sync.collections.len(), 1);
        assert_eq!(config.sync.conflict_policy, ConflictPolicy::Merge);
        assert_eq!(config.api.timeout_ms, 10_000);
    }

    #[test]
    fn test_invalid_collection_in_toml_is_rejected() {
        let result: Result<SyncConfig, _> = toml::from_str(
            r#"
            [sync]
            collections = ["Not Valid"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fairway-sync.toml");

        let mut config = SyncConfig::default();
        config.device.name = "Bar".into();
        config.save(Some(path.clone())).unwrap();

        let loaded = SyncConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.device.name, "Bar");
        assert_eq!(loaded.device.id, config.device.id);
    }
}
