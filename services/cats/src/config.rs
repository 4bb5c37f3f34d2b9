use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the cat service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// NSFW classification configuration
    #[serde(default)]
    pub nsfw: NsfwConfig,
    /// Image resize configuration
    #[serde(default)]
    pub image: ImageConfig,
    /// Seed loader configuration
    #[serde(default)]
    pub seed: SeedConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL, or `memory://` for the in-process store
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// What the classification gate reports when the external service fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Treat the image as safe
    FailOpen,
    /// Treat the image as unsafe
    FailClosed,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::FailOpen
    }
}

/// NSFW classification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NsfwConfig {
    /// Call the external classifier at all
    #[serde(default)]
    pub enabled: bool,
    /// Full URL of the classification endpoint
    pub url: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_nsfw_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Behaviour when the classifier is unreachable or errors
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// Image resize configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// Largest allowed width or height after resize
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// JPEG re-encode quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// Seed loader configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SeedConfig {
    /// Load the bundled litter on startup when the store is empty
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory holding the bundled sample images
    #[serde(default = "default_seed_directory")]
    pub directory: PathBuf,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest accepted request body in bytes; uploads carry base64 images
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "cat-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_nsfw_timeout_secs() -> u64 {
    10
}

fn default_max_dimension() -> u32 {
    640
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_seed_directory() -> PathBuf {
    PathBuf::from("assets/litter")
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "cat-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .set_default("database.url", "memory://")?
            .add_source(config::File::with_name("config/cats").required(false))
            .add_source(config::File::with_name("/etc/petbattle/cats").required(false))
            // CATS__NSFW__ENABLED -> nsfw.enabled
            .add_source(
                config::Environment::with_prefix("CATS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingField("database.url".to_string()));
        }

        if self.nsfw.enabled {
            match self.nsfw.url.as_deref() {
                None | Some("") => {
                    return Err(ConfigValidationError::MissingField("nsfw.url".to_string()));
                }
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    return Err(ConfigValidationError::InvalidValue {
                        field: "nsfw.url".to_string(),
                        message: format!("expected an http(s) URL, got {url}"),
                    });
                }
                _ => {}
            }
        }

        if self.image.max_dimension == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "image.max_dimension".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if !(1..=100).contains(&self.image.jpeg_quality) {
            return Err(ConfigValidationError::InvalidValue {
                field: "image.jpeg_quality".to_string(),
                message: format!("must be within 1-100, got {}", self.image.jpeg_quality),
            });
        }

        Ok(())
    }

    /// Whether the in-process store was requested
    pub fn uses_memory_store(&self) -> bool {
        self.database.url.starts_with("memory://")
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl NsfwConfig {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for NsfwConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            request_timeout_secs: default_nsfw_timeout_secs(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_seed_directory(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
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
