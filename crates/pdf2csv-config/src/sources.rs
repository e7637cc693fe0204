// Configuration source loading
//
// Loads configuration from multiple sources with priority:
// 1. Environment variables (highest)
// 2. Config file from PDF2CSV_CONFIG path
// 3. Default config files (./config.toml, ./.pdf2csv.toml)
// 4. Built-in defaults (lowest)

use crate::*;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

const ENV_PREFIX: &str = "PDF2CSV_";

/// Load configuration from all sources
pub fn load_config() -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::default();

    if let Some(file_config) = load_from_file()? {
        config = file_config;
    }

    apply_env_overrides(&mut config)?;

    config.clamp();
    config.validate()?;

    Ok(config)
}

/// Load configuration from an explicit file path, then env overrides
pub fn load_config_from_path(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config: RuntimeConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    apply_env_overrides(&mut config)?;

    config.clamp();
    config.validate()?;

    Ok(config)
}

/// Load configuration from file
fn load_from_file() -> Result<Option<RuntimeConfig>> {
    // Check for explicit config file path
    if let Ok(path) = env::var("PDF2CSV_CONFIG") {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: RuntimeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        return Ok(Some(config));
    }

    // Try default config file locations
    for path in &["./config.toml", "./.pdf2csv.toml"] {
        if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            let config: RuntimeConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path))?;
            return Ok(Some(config));
        }
    }

    Ok(None)
}

/// Apply environment variable overrides (highest priority)
fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<()> {
    // Queue configuration
    if let Some(val) = env_parsed::<usize>("MAX_CONCURRENT_BATCHES")? {
        config.queue.max_concurrent_batches = val;
    }
    if let Some(val) = env_parsed::<usize>("MAX_QUEUE_LENGTH")? {
        config.queue.max_queue_length = val;
    }
    if let Some(val) = env_parsed::<u64>("BATCH_QUEUE_TIMEOUT_MS")? {
        config.queue.batch_queue_timeout_ms = val;
    }
    if let Some(val) = env_parsed::<f64>("BATCH_QUEUE_TIMEOUT_MULTIPLIER")? {
        config.queue.batch_queue_timeout_multiplier = val;
    }
    if let Some(val) = env_parsed::<u64>("AVERAGE_BATCH_SECONDS")? {
        config.queue.average_batch_seconds = val;
    }
    if let Some(val) = env_flag("ENABLE_QUEUE_LOGGING")? {
        config.queue.enable_queue_logging = val;
    }
    if let Some(val) = env_flag("ENABLE_GRACEFUL_SHUTDOWN")? {
        config.queue.enable_graceful_shutdown = val;
    }
    if let Some(val) = env_parsed::<u64>("GRACEFUL_SHUTDOWN_TIMEOUT_MS")? {
        config.queue.graceful_shutdown_timeout_ms = val;
    }

    // Server configuration
    if let Some(addr) = env_var("LISTEN_ADDR") {
        config.server.listen_addr = addr;
    }
    if let Some(level) = env_var("LOG_LEVEL") {
        config.server.log_level = level;
    }
    if let Some(format) = env_var("LOG_FORMAT") {
        config.server.log_format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }
    if let Some(path) = env_var("WS_PATH") {
        config.server.ws_path = path;
    }
    if let Some(origins) = env_var("ALLOWED_ORIGINS") {
        config.server.allowed_origins = origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
    }
    if let Some(secret) = env_var("ADMIN_SECRET") {
        config.server.admin_secret = Some(secret);
    }
    if let Some(val) = env_parsed::<usize>("MAX_PAYLOAD_BYTES")? {
        config.server.max_payload_bytes = val;
    }
    if let Some(val) = env_parsed::<usize>("WS_BACKLOG_THRESHOLD")? {
        config.server.ws_backlog_threshold = val;
    }

    // Database configuration
    if let Some(url) = env_var("DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Some(val) = env_parsed::<u32>("DATABASE_MAX_CONNECTIONS")? {
        config.database.max_connections = val;
    }

    // Storage backend
    if let Some(backend) = env_var("STORAGE_BACKEND") {
        config.storage.backend = backend
            .parse::<StorageBackend>()
            .context("Invalid PDF2CSV_STORAGE_BACKEND value")?;
    }
    if let Some(path) = env_var("STORAGE_PATH") {
        let fs = config.storage.fs.get_or_insert_with(FsConfig::default);
        fs.path = path;
    }
    if let Some(bucket) = env_var("S3_BUCKET") {
        let s3 = config.storage.s3.get_or_insert_with(|| S3Config {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
        });
        s3.bucket = bucket;
    }
    if let Some(region) = env_var("S3_REGION") {
        let s3 = config.storage.s3.get_or_insert_with(|| S3Config {
            bucket: String::new(),
            region: String::new(),
            endpoint: None,
        });
        s3.region = region;
    }
    if let Some(endpoint) = env_var("S3_ENDPOINT") {
        let s3 = config.storage.s3.get_or_insert_with(|| S3Config {
            bucket: String::new(),
            region: String::new(),
            endpoint: None,
        });
        s3.endpoint = Some(endpoint);
    }
    if let Some(prefix) = env_var("RAW_PREFIX") {
        config.storage.raw_prefix = prefix;
    }
    if let Some(prefix) = env_var("PROCESSED_PREFIX") {
        config.storage.processed_prefix = prefix;
    }

    // OCR collaborator
    if let Some(endpoint) = env_var("OCR_ENDPOINT") {
        config.ocr.endpoint = endpoint;
    }
    if let Some(key) = env_var("OCR_API_KEY") {
        config.ocr.api_key = Some(key);
    }
    if let Some(val) = env_parsed::<u64>("OCR_REQUEST_TIMEOUT_SECS")? {
        config.ocr.request_timeout_secs = val;
    }
    if let Some(val) = env_parsed::<u32>("OCR_MAX_ATTEMPTS")? {
        config.ocr.max_attempts = val;
    }
    if let Some(val) = env_parsed::<u64>("OCR_RETRY_BASE_DELAY_MS")? {
        config.ocr.retry_base_delay_ms = val;
    }
    if let Some(val) = env_parsed::<usize>("OCR_MAX_FILE_CONCURRENCY")? {
        config.ocr.max_file_concurrency = val;
    }

    // Request handling
    if let Some(val) = env_parsed::<usize>("MAX_FILES_PER_BATCH")? {
        config.request.max_files_per_batch = val;
    }

    Ok(())
}

/// One prefixed variable as a trimmed string. Unset, empty, and
/// non-unicode values all count as "not set".
fn env_var(key: &str) -> Option<String> {
    let value = env::var(format!("{}{}", ENV_PREFIX, key)).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a prefixed variable into any `FromStr` type. Absence is fine;
/// garbage is a startup error naming the offending variable.
fn env_parsed<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = env_var(key) else {
        return Ok(None);
    };
    match raw.parse::<T>() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => anyhow::bail!(
            "cannot parse {}{}={:?}: {}",
            ENV_PREFIX,
            key,
            raw,
            err
        ),
    }
}

/// Boolean switches accept the usual on/off spellings.
fn env_flag(key: &str) -> Result<Option<bool>> {
    let Some(raw) = env_var(key) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        other => anyhow::bail!("{}{} wants a boolean, not {:?}", ENV_PREFIX, key, other),
    }
}
