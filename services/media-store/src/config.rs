use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the media store service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Thumbnail generation configuration
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
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

/// Which blob backend to talk to
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// S3 or any S3-compatible endpoint (MinIO, LocalStack, ...)
    #[default]
    S3,
    /// Process-local store, contents are lost on restart
    Memory,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Bucket holding both collections. The S3 backend is unconfigured without it.
    pub bucket: Option<String>,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base used to build public object URLs, e.g. a CDN in front of the bucket
    pub public_base_url: Option<String>,
    /// Collection (key prefix) for uploaded videos
    #[serde(default = "default_videos_container")]
    pub videos_container: String,
    /// Collection (key prefix) for generated thumbnails
    #[serde(default = "default_thumbnails_container")]
    pub thumbnails_container: String,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// HTTP API configuration
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
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest accepted request body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Thumbnail worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// ffmpeg executable, resolved through PATH when relative
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Offset of the extracted frame
    #[serde(default = "default_seek_secs")]
    pub seek_secs: f64,
    /// Concurrent ffmpeg runs
    #[serde(default = "default_thumbnail_concurrency")]
    pub concurrency: usize,
    /// Pending notifications before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Poll interval of the videos collection watcher, 0 disables it
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Generate thumbnails for videos already present at startup
    #[serde(default)]
    pub backfill: bool,
}

// Default value functions
fn default_service_name() -> String {
    "media-store".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_videos_container() -> String {
    "videos".to_string()
}

fn default_thumbnails_container() -> String {
    "thumbnails".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    7072
}

fn default_max_upload_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_seek_secs() -> f64 {
    1.0
}

fn default_thumbnail_concurrency() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    64
}

fn default_poll_interval_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "media-store")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/media-store").required(false))
            .add_source(config::File::with_name("/etc/media-store/config").required(false))
            // Override with environment variables
            // MEDIA__STORAGE__BUCKET -> storage.bucket
            .add_source(
                config::Environment::with_prefix("MEDIA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get watcher poll interval, `None` when polling is disabled
    pub fn watch_interval(&self) -> Option<Duration> {
        match self.thumbnail.poll_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
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

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: None,
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            public_base_url: None,
            videos_container: default_videos_container(),
            thumbnails_container: default_thumbnails_container(),
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
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
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ffmpeg_path: default_ffmpeg_path(),
            seek_secs: default_seek_secs(),
            concurrency: default_thumbnail_concurrency(),
            queue_capacity: default_queue_capacity(),
            poll_interval_secs: default_poll_interval_secs(),
            backfill: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.storage.videos_container, "videos");
        assert_eq!(config.storage.thumbnails_container, "thumbnails");
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert!(config.storage.bucket.is_none());
        assert_eq!(config.api.port, 7072);
        assert_eq!(config.thumbnail.seek_secs, 1.0);
    }

    #[test]
    fn test_watch_interval_disabled_at_zero() {
        let mut config = Config::default();
        assert_eq!(config.watch_interval(), Some(Duration::from_secs(30)));

        config.thumbnail.poll_interval_secs = 0;
        assert_eq!(config.watch_interval(), None);
    }

    #[test]
    fn test_deserialize_partial_tree() {
        let config: Config = config::Config::builder()
            .set_override("storage.backend", "memory")
            .unwrap()
            .set_override("api.port", 8080)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.service.name, "media-store");
    }
}
