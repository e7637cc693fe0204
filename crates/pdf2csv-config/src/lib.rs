// pdf2csv-config - Unified runtime configuration
//
// Supports configuration from multiple sources:
// 1. Environment variables with PDF2CSV_ prefix (highest priority)
// 2. Config file path from PDF2CSV_CONFIG env var
// 3. Default config file locations (./config.toml, ./.pdf2csv.toml)
// 4. Built-in defaults (lowest priority)
//
// Queue options are clamped to their documented bounds at load time; a
// clamped value logs a warning rather than failing startup.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod sources;
mod validation;

/// Main runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    pub storage: StorageConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub request: RequestConfig,
}

/// Batch queue manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Concurrent execution slots, clamped to 1..=20.
    pub max_concurrent_batches: usize,
    /// Parked-job cap, clamped to 10..=1000.
    pub max_queue_length: usize,
    /// Per-batch wall-clock limit in milliseconds, at least 60_000.
    pub batch_queue_timeout_ms: u64,
    /// Scales the timeout, clamped to 0.5..=5.0.
    pub batch_queue_timeout_multiplier: f64,
    /// Wait-time seed until completion samples exist, at least 30 seconds.
    pub average_batch_seconds: u64,
    pub enable_queue_logging: bool,
    pub enable_graceful_shutdown: bool,
    /// Drain window on shutdown in milliseconds, clamped to 60_000..=600_000.
    pub graceful_shutdown_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 1,
            max_queue_length: 500,
            batch_queue_timeout_ms: 1_800_000,
            batch_queue_timeout_multiplier: 1.0,
            average_batch_seconds: 150,
            enable_queue_logging: false,
            enable_graceful_shutdown: true,
            graceful_shutdown_timeout_ms: 120_000,
        }
    }
}

impl QueueConfig {
    /// The effective per-batch timeout: base limit scaled by the multiplier.
    pub fn effective_timeout(&self) -> Duration {
        let ms = (self.batch_queue_timeout_ms as f64 * self.batch_queue_timeout_multiplier) as u64;
        Duration::from_millis(ms)
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_timeout_ms)
    }
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
    /// WebSocket upgrade path.
    pub ws_path: String,
    /// CORS origins; `*` permits any origin (development only).
    pub allowed_origins: Vec<String>,
    /// Shared secret for the /api/admin endpoints. Unset disables them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_secret: Option<String>,
    pub max_payload_bytes: usize,
    /// Outbound frames buffered per socket before the client is dropped.
    pub ws_backlog_threshold: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            ws_path: "/ws".to_string(),
            allowed_origins: vec!["*".to_string()],
            admin_secret: None,
            max_payload_bytes: 64 * 1024 * 1024,
            ws_backlog_threshold: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Relational store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string. Unset selects the in-memory store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Blob storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,

    /// Key prefix for raw uploaded documents.
    #[serde(default = "default_raw_prefix")]
    pub raw_prefix: String,
    /// Key prefix for processed artifacts.
    #[serde(default = "default_processed_prefix")]
    pub processed_prefix: String,
}

fn default_raw_prefix() -> String {
    "raw".to_string()
}

fn default_processed_prefix() -> String {
    "processed".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    S3,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Fs => write!(f, "fs"),
            StorageBackend::S3 => write!(f, "s3"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fs" | "filesystem" => Ok(StorageBackend::Fs),
            "s3" | "aws" => Ok(StorageBackend::S3),
            _ => anyhow::bail!("Unsupported storage backend: {}. Supported: fs, s3", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    pub path: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            path: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// OCR collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Extraction service endpoint; empty disables the HTTP client (tests
    /// supply their own collaborator).
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    /// Attempts per file before the row is marked failed.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Files processed concurrently within one batch.
    pub max_file_concurrency: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            request_timeout_secs: 120,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            max_file_concurrency: 4,
        }
    }
}

/// Request handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Cap on files per upload request.
    pub max_files_per_batch: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_files_per_batch: 50,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Load configuration from an explicit TOML file path
    pub fn load_from_path(path: &std::path::Path) -> Result<Self> {
        sources::load_config_from_path(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Clamp queue options to their documented bounds, warning per clamp.
    pub fn clamp(&mut self) {
        validation::clamp_queue_config(&mut self.queue);
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig {
                backend: StorageBackend::Fs,
                fs: Some(FsConfig::default()),
                s3: None,
                raw_prefix: default_raw_prefix(),
                processed_prefix: default_processed_prefix(),
            },
            ocr: OcrConfig::default(),
            request: RequestConfig::default(),
        }
    }
}
