use serde::Deserialize;

/// Main configuration for the model registry service
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage layout and placement configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// S3 configuration (used when placement = "s3")
    #[serde(default)]
    pub s3: S3Config,
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

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// API listen address
    #[serde(default = "default_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL used to build viewer links encoded into QR codes
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted upload body size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Where uploaded assets and generated QR images live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    /// Copy into web-servable directories on local disk
    Local,
    /// Upload to an S3-compatible bucket
    S3,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Placement strategy, selected once at startup
    #[serde(default = "default_placement")]
    pub placement: PlacementMode,
    /// Path of the JSON registry document
    #[serde(default = "default_data_file")]
    pub data_file: String,
    /// Directory for locally placed model binaries
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
    /// Directory for locally placed QR images
    #[serde(default = "default_qr_codes_dir")]
    pub qr_codes_dir: String,
    /// Spool directory for in-flight upload temp files
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,
}

/// S3 placement configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for asset storage
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Public base URL for stored objects; defaults to the bucket's
    /// virtual-hosted AWS URL when unset
    pub public_url: Option<String>,
}

// Default value functions
fn default_service_name() -> String {
    "model-registry".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9464
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024 // 100MB, .glb scenes can be large
}

fn default_placement() -> PlacementMode {
    PlacementMode::Local
}

fn default_data_file() -> String {
    "data/models.json".to_string()
}

fn default_uploads_dir() -> String {
    "public/uploads".to_string()
}

fn default_qr_codes_dir() -> String {
    "public/qr-codes".to_string()
}

fn default_spool_dir() -> String {
    "data/spool".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/registry").required(false))
            .add_source(config::File::with_name("/etc/model-registry/registry").required(false))
            // Override with environment variables
            // REGISTRY__STORAGE__PLACEMENT -> storage.placement
            .add_source(
                config::Environment::with_prefix("REGISTRY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
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

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            placement: default_placement(),
            data_file: default_data_file(),
            uploads_dir: default_uploads_dir(),
            qr_codes_dir: default_qr_codes_dir(),
            spool_dir: default_spool_dir(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            public_url: None,
        }
    }
}
