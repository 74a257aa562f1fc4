//! Configuration management for the frameshow engine.
//!
//! Configuration is loaded from optional TOML files and environment
//! variables; every field has a default so the engine runs out of the box
//! on a freshly flashed device.

use crate::order_index::OrderPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the frameshow engine.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service-level configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Storage paths and artifact geometry
    #[serde(default)]
    pub storage: StorageConfig,

    /// Ingestion queue tuning
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Slideshow behavior
    #[serde(default)]
    pub slideshow: SlideshowConfig,
}

/// Service-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Storage paths and artifact geometry.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory where raw submissions are retained
    #[serde(default = "default_originals_dir")]
    pub originals_dir: PathBuf,

    /// Directory of display-ready artifacts
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Directory of persisted playlist indices
    #[serde(default = "default_playlist_dir")]
    pub playlist_dir: PathBuf,

    /// Path of the metadata table file
    #[serde(default = "default_metadata_file")]
    pub metadata_file: PathBuf,

    /// Artifact width in pixels (display footprint)
    #[serde(default = "default_target_width")]
    pub target_width: u32,

    /// Artifact height in pixels (display footprint)
    #[serde(default = "default_target_height")]
    pub target_height: u32,

    /// JPEG quality for encoded artifacts (1-100)
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Listing cache time-to-live in seconds
    #[serde(default = "default_listing_ttl_secs")]
    pub listing_ttl_secs: u64,
}

/// Ingestion queue tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Quiescence window after the last submission before a batch run, in
    /// milliseconds. Every submission restarts the window.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Maximum jobs drained per batch run
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between successive batch runs of one drain, in milliseconds
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

/// Slideshow behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct SlideshowConfig {
    /// Ordering policy the cursor starts on
    #[serde(default = "default_sort_by")]
    pub sort_by: OrderPolicy,

    /// Wrap around at the playlist boundaries
    #[serde(default = "default_true")]
    pub looping: bool,
}

// Default value functions
fn default_service_name() -> String {
    "frameshow".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_originals_dir() -> PathBuf {
    PathBuf::from("./data/originals")
}
fn default_artifact_dir() -> PathBuf {
    PathBuf::from("./data/artifacts")
}
fn default_playlist_dir() -> PathBuf {
    PathBuf::from("./data/artifacts/playlists")
}
fn default_metadata_file() -> PathBuf {
    PathBuf::from("./data/artifacts/metadata.json")
}
fn default_target_width() -> u32 {
    1024
}
fn default_target_height() -> u32 {
    600
}
fn default_quality() -> u8 {
    85
}
fn default_listing_ttl_secs() -> u64 {
    5
}
fn default_debounce_ms() -> u64 {
    15_000
}
fn default_batch_size() -> usize {
    5
}
fn default_batch_pause_ms() -> u64 {
    500
}
fn default_sort_by() -> OrderPolicy {
    OrderPolicy::Recency
}
fn default_true() -> bool {
    true
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            originals_dir: default_originals_dir(),
            artifact_dir: default_artifact_dir(),
            playlist_dir: default_playlist_dir(),
            metadata_file: default_metadata_file(),
            target_width: default_target_width(),
            target_height: default_target_height(),
            quality: default_quality(),
            listing_ttl_secs: default_listing_ttl_secs(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

impl Default for SlideshowConfig {
    fn default() -> Self {
        Self {
            sort_by: default_sort_by(),
            looping: default_true(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            storage: StorageConfig::default(),
            ingest: IngestConfig::default(),
            slideshow: SlideshowConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Later sources override earlier ones:
    /// 1. config/frameshow.toml (optional)
    /// 2. /etc/frameshow/config.toml (optional)
    /// 3. Environment variables (e.g. FRAMESHOW__STORAGE__TARGET_WIDTH)
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/frameshow").required(false))
            .add_source(config::File::with_name("/etc/frameshow/config").required(false))
            .add_source(
                config::Environment::with_prefix("FRAMESHOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.storage.target_width == 0 || self.storage.target_height == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "storage.target_width/height".to_string(),
                message: "Dimensions must be greater than 0".to_string(),
            });
        }

        if self.storage.quality == 0 || self.storage.quality > 100 {
            return Err(ConfigValidationError::InvalidValue {
                field: "storage.quality".to_string(),
                message: "JPEG quality must be in 1..=100".to_string(),
            });
        }

        if self.ingest.batch_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "ingest.batch_size".to_string(),
                message: "Batch size must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl StorageConfig {
    /// Get the listing cache TTL as Duration.
    pub fn listing_ttl(&self) -> Duration {
        Duration::from_secs(self.listing_ttl_secs)
    }
}

impl IngestConfig {
    /// Get the debounce window as Duration.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Get the inter-batch pause as Duration.
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ingest.batch_size, 5);
        assert_eq!(config.ingest.debounce(), Duration::from_secs(15));
        assert_eq!(config.slideshow.sort_by, OrderPolicy::Recency);
    }

    #[test]
    fn test_invalid_dimensions() {
        let mut config = Config::default();
        config.storage.target_width = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_invalid_quality() {
        let mut config = Config::default();
        config.storage.quality = 101;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_invalid_batch_size() {
        let mut config = Config::default();
        config.ingest.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_policy_deserializes_from_snake_case() {
        let config: SlideshowConfig =
            serde_json::from_str(r#"{"sort_by": "captured_time"}"#).unwrap();
        assert_eq!(config.sort_by, OrderPolicy::CapturedTime);
    }
}
