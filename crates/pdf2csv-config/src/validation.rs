// Configuration validation and clamping
//
// Queue options are clamped to their documented bounds with a warning;
// structural problems (missing backend sections, malformed addresses) fail
// startup.

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_server_config(&config.server)?;
    validate_database_config(&config.database)?;
    validate_storage_config(&config.storage)?;
    validate_ocr_config(&config.ocr)?;
    validate_request_config(&config.request)?;
    Ok(())
}

/// Clamp queue options to their documented bounds, warning on each clamp.
pub fn clamp_queue_config(config: &mut QueueConfig) {
    config.max_concurrent_batches = clamp_usize(
        "queue.max_concurrent_batches",
        config.max_concurrent_batches,
        1,
        20,
    );
    config.max_queue_length =
        clamp_usize("queue.max_queue_length", config.max_queue_length, 10, 1000);

    if config.batch_queue_timeout_ms < 60_000 {
        warn!(
            value = config.batch_queue_timeout_ms,
            "queue.batch_queue_timeout_ms below minimum; raising to 60000"
        );
        config.batch_queue_timeout_ms = 60_000;
    }

    if config.batch_queue_timeout_multiplier < 0.5 || config.batch_queue_timeout_multiplier > 5.0 {
        let clamped = config.batch_queue_timeout_multiplier.clamp(0.5, 5.0);
        warn!(
            value = config.batch_queue_timeout_multiplier,
            clamped, "queue.batch_queue_timeout_multiplier out of bounds; clamping"
        );
        config.batch_queue_timeout_multiplier = clamped;
    }

    if config.average_batch_seconds < 30 {
        warn!(
            value = config.average_batch_seconds,
            "queue.average_batch_seconds below minimum; raising to 30"
        );
        config.average_batch_seconds = 30;
    }

    let drain = config.graceful_shutdown_timeout_ms;
    let clamped_drain = drain.clamp(60_000, 600_000);
    if clamped_drain != drain {
        warn!(
            value = drain,
            clamped = clamped_drain,
            "queue.graceful_shutdown_timeout_ms out of bounds; clamping"
        );
        config.graceful_shutdown_timeout_ms = clamped_drain;
    }
}

fn clamp_usize(name: &str, value: usize, min: usize, max: usize) -> usize {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(value, clamped, "{} out of bounds; clamping", name);
    }
    clamped
}

fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.listen_addr.is_empty() {
        bail!("server.listen_addr must not be empty");
    }

    if !config.listen_addr.contains(':') {
        bail!("server.listen_addr must be in format 'host:port'");
    }

    if !config.ws_path.starts_with('/') {
        bail!("server.ws_path must start with '/'");
    }

    if config.max_payload_bytes == 0 {
        bail!("server.max_payload_bytes must be greater than 0");
    }

    if config.ws_backlog_threshold == 0 {
        bail!("server.ws_backlog_threshold must be greater than 0");
    }

    Ok(())
}

fn validate_database_config(config: &DatabaseConfig) -> Result<()> {
    if let Some(url) = &config.url {
        if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
            bail!("database.url must be a postgres:// connection string");
        }
    }

    if config.max_connections == 0 {
        bail!("database.max_connections must be greater than 0");
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    match config.backend {
        StorageBackend::Fs => {
            let fs = config
                .fs
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("fs storage backend requires 'fs' configuration"))?;

            if fs.path.is_empty() {
                bail!("storage.fs.path must not be empty");
            }
        }
        StorageBackend::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("s3 storage backend requires 's3' configuration"))?;

            if s3.bucket.is_empty() {
                bail!("storage.s3.bucket is required for S3 backend");
            }

            if s3.region.is_empty() {
                bail!("storage.s3.region is required for S3 backend");
            }
        }
    }

    if config.raw_prefix.is_empty() || config.processed_prefix.is_empty() {
        bail!("storage prefixes must not be empty");
    }

    Ok(())
}

fn validate_ocr_config(config: &OcrConfig) -> Result<()> {
    if config.max_attempts == 0 {
        bail!("ocr.max_attempts must be greater than 0");
    }

    if config.max_file_concurrency == 0 {
        bail!("ocr.max_file_concurrency must be greater than 0");
    }

    if config.request_timeout_secs == 0 {
        bail!("ocr.request_timeout_secs must be greater than 0");
    }

    Ok(())
}

fn validate_request_config(config: &RequestConfig) -> Result<()> {
    if config.max_files_per_batch == 0 {
        bail!("request.max_files_per_batch must be greater than 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_queue_config() {
        let mut config = QueueConfig {
            max_concurrent_batches: 64,
            max_queue_length: 3,
            batch_queue_timeout_ms: 1_000,
            batch_queue_timeout_multiplier: 9.0,
            average_batch_seconds: 5,
            enable_queue_logging: false,
            enable_graceful_shutdown: true,
            graceful_shutdown_timeout_ms: 5_000,
        };

        clamp_queue_config(&mut config);

        assert_eq!(config.max_concurrent_batches, 20);
        assert_eq!(config.max_queue_length, 10);
        assert_eq!(config.batch_queue_timeout_ms, 60_000);
        assert_eq!(config.batch_queue_timeout_multiplier, 5.0);
        assert_eq!(config.average_batch_seconds, 30);
        assert_eq!(config.graceful_shutdown_timeout_ms, 60_000);
    }

    #[test]
    fn test_clamp_leaves_valid_values() {
        let mut config = QueueConfig::default();
        let before = config.clone();
        clamp_queue_config(&mut config);
        assert_eq!(config.max_concurrent_batches, before.max_concurrent_batches);
        assert_eq!(config.max_queue_length, before.max_queue_length);
    }

    #[test]
    fn test_validate_server_config() {
        let valid = ServerConfig::default();
        assert!(validate_server_config(&valid).is_ok());

        let bad_addr = ServerConfig {
            listen_addr: "localhost".to_string(),
            ..ServerConfig::default()
        };
        assert!(validate_server_config(&bad_addr).is_err());

        let bad_ws = ServerConfig {
            ws_path: "ws".to_string(),
            ..ServerConfig::default()
        };
        assert!(validate_server_config(&bad_ws).is_err());
    }

    #[test]
    fn test_validate_database_config() {
        let memory = DatabaseConfig::default();
        assert!(validate_database_config(&memory).is_ok());

        let pg = DatabaseConfig {
            url: Some("postgres://localhost/pdf2csv".to_string()),
            max_connections: 5,
        };
        assert!(validate_database_config(&pg).is_ok());

        let bad = DatabaseConfig {
            url: Some("mysql://localhost/pdf2csv".to_string()),
            max_connections: 5,
        };
        assert!(validate_database_config(&bad).is_err());
    }

    #[test]
    fn test_validate_storage_config() {
        let fs_missing = StorageConfig {
            backend: StorageBackend::Fs,
            fs: None,
            s3: None,
            raw_prefix: "raw".to_string(),
            processed_prefix: "processed".to_string(),
        };
        assert!(validate_storage_config(&fs_missing).is_err());

        let s3_ok = StorageConfig {
            backend: StorageBackend::S3,
            fs: None,
            s3: Some(S3Config {
                bucket: "docs".to_string(),
                region: "us-east-1".to_string(),
                endpoint: None,
            }),
            raw_prefix: "raw".to_string(),
            processed_prefix: "processed".to_string(),
        };
        assert!(validate_storage_config(&s3_ok).is_ok());
    }
}
