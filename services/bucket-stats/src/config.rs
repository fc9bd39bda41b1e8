//! Configuration for the bucket report.
//!
//! Reads the same files and `CAMBACKUP` environment variables as the
//! uploader; only the `s3` and `logging` sections are used here.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub s3: S3Config,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// S3 bucket and prefix to report on
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_prefix() -> String {
    "camera/".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::from_builder(config::Config::builder())
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        builder
            .add_source(config::File::with_name("config/uploader").required(false))
            .add_source(config::File::with_name("/etc/cambackup/uploader").required(false))
            .add_source(
                config::Environment::with_prefix("CAMBACKUP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn destination(&self) -> String {
        format!("s3://{}/{}", self.s3.bucket, self.s3.prefix)
    }
}
