//! Configuration management for the uploader service.
//!
//! Loaded once at startup from optional config files and environment
//! variables (prefixed with `CAMBACKUP`), then validated before anything is
//! watched or uploaded.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Smallest part size S3 accepts for every part but the last.
pub const MIN_PART_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Main configuration for the uploader service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Watched directory and event filters
    pub watch: WatchConfig,
    /// S3 destination and transfer tuning
    pub s3: S3Config,
    /// File stabilization parameters
    #[serde(default)]
    pub stabilization: StabilizationConfig,
    /// Upload retry budget
    #[serde(default)]
    pub upload: UploadConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Prometheus exporter configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Watch directory configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Directory the recorder writes new clips into (watched recursively)
    pub root: PathBuf,
    /// File name prefixes that are never backed up (case-sensitive)
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_prefixes: Vec<String>,
    /// Extensions eligible for upload (matched case-insensitively)
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for clip backups
    pub bucket: String,
    /// Key prefix prepended to every uploaded object
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Multipart upload threshold in bytes (25MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (25MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
    /// Parts uploaded concurrently during a multipart transfer
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

/// Stabilization configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StabilizationConfig {
    /// Consecutive unchanged, readable samples required
    #[serde(default = "default_stable_checks")]
    pub stable_checks: u32,
    /// Delay between samples in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay after a lock or read error in milliseconds
    #[serde(default = "default_lock_backoff_ms")]
    pub lock_backoff_ms: u64,
    /// Give up on a file that has not settled after this many seconds
    #[serde(default = "default_stabilization_timeout_secs")]
    pub timeout_secs: u64,
}

/// Upload retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Transfer attempts per file before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Metrics exporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics export
    #[serde(default)]
    pub enabled: bool,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_excluded_prefixes() -> Vec<String> {
    vec!["xxx123xxx".to_string(), "yyy123yyy".to_string()]
}

fn default_allowed_extensions() -> Vec<String> {
    ["dat", "bvr", "avi", "mov", "jpg", "mp4"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

fn default_prefix() -> String {
    "camera/".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    25 * 1024 * 1024 // 25MB
}

fn default_part_size() -> usize {
    25 * 1024 * 1024 // 25MB
}

fn default_max_concurrency() -> usize {
    10
}

fn default_stable_checks() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_lock_backoff_ms() -> u64 {
    1000
}

fn default_stabilization_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            stable_checks: default_stable_checks(),
            poll_interval_ms: default_poll_interval_ms(),
            lock_backoff_ms: default_lock_backoff_ms(),
            timeout_secs: default_stabilization_timeout_secs(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/uploader").required(false))
            .add_source(config::File::with_name("/etc/cambackup/uploader").required(false))
            // Override with environment variables
            // CAMBACKUP__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("CAMBACKUP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("watch.excluded_prefixes")
                    .with_list_parse_key("watch.allowed_extensions")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.watch.root.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField("watch.root".to_string()));
        }

        if self.watch.allowed_extensions.is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: "watch.allowed_extensions".to_string(),
                message: "At least one extension must be allowed".to_string(),
            });
        }

        if self.s3.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField("s3.bucket".to_string()));
        }

        if self.s3.part_size_bytes < MIN_PART_SIZE_BYTES {
            return Err(ConfigValidationError::InvalidValue {
                field: "s3.part_size_bytes".to_string(),
                message: format!("Part size must be at least {} bytes", MIN_PART_SIZE_BYTES),
            });
        }

        if self.s3.max_concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "s3.max_concurrency".to_string(),
                message: "Concurrency must be greater than 0".to_string(),
            });
        }

        if self.stabilization.stable_checks == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "stabilization.stable_checks".to_string(),
                message: "At least one stable check is required".to_string(),
            });
        }

        if self.stabilization.poll_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "stabilization.poll_interval_ms".to_string(),
                message: "Poll interval must be greater than 0".to_string(),
            });
        }

        if self.upload.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.max_attempts".to_string(),
                message: "At least one attempt is required".to_string(),
            });
        }

        Ok(())
    }
}

impl StabilizationConfig {
    /// Get the poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get the lock backoff as Duration.
    pub fn lock_backoff(&self) -> Duration {
        Duration::from_millis(self.lock_backoff_ms)
    }

    /// Get the overall timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
pub(crate) fn test_config(root: impl Into<PathBuf>) -> Config {
    Config {
        watch: WatchConfig {
            root: root.into(),
            excluded_prefixes: default_excluded_prefixes(),
            allowed_extensions: default_allowed_extensions(),
        },
        s3: S3Config {
            bucket: "security-cam-backups".to_string(),
            prefix: default_prefix(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
            max_concurrency: default_max_concurrency(),
        },
        stabilization: StabilizationConfig::default(),
        upload: UploadConfig::default(),
        logging: LoggingConfig::default(),
        metrics: MetricsConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let stabilization = StabilizationConfig::default();
        assert_eq!(stabilization.stable_checks, 3);
        assert_eq!(stabilization.poll_interval(), Duration::from_millis(500));
        assert_eq!(stabilization.lock_backoff(), Duration::from_secs(1));
        assert_eq!(stabilization.timeout(), Duration::from_secs(60));
        assert_eq!(UploadConfig::default().max_attempts, 3);
        assert_eq!(default_prefix(), "camera/");
    }

    #[test]
    fn test_valid_config() {
        let config = test_config("/srv/cams/new");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_bucket() {
        let mut config = test_config("/srv/cams/new");
        config.s3.bucket = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_missing_watch_root() {
        let config = test_config("");
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_zero_stable_checks() {
        let mut config = test_config("/srv/cams/new");
        config.stabilization.stable_checks = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_attempts() {
        let mut config = test_config("/srv/cams/new");
        config.upload.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_part_size_below_s3_minimum() {
        let mut config = test_config("/srv/cams/new");
        config.s3.part_size_bytes = 1024;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: Config = config::Config::builder()
            .set_override("watch.root", "/srv/cams/new")
            .unwrap()
            .set_override("s3.bucket", "security-cam-backups")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.s3.prefix, "camera/");
        assert_eq!(config.watch.allowed_extensions.len(), 6);
        assert_eq!(config.watch.excluded_prefixes, default_excluded_prefixes());
        assert_eq!(config.stabilization.stable_checks, 3);
        assert_eq!(config.logging.format, "text");
        assert!(!config.metrics.enabled);
    }
}
