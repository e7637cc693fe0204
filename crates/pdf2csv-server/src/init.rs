// Initialization utilities for server mode
//
// Metadata store, OCR client, and logging/tracing setup

use anyhow::Result;
use async_trait::async_trait;
use pdf2csv_config::{LogFormat, RuntimeConfig};
use pdf2csv_core::ExtractedDocument;
use pdf2csv_runner::{HttpOcrClient, OcrClient, OcrError};
use pdf2csv_store::{MemoryMetadataStore, MetadataStore, PgMetadataStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Initialize the metadata store: Postgres when a URL is configured, the
/// in-memory table otherwise (local development and tests).
pub(crate) async fn init_store(config: &RuntimeConfig) -> Result<Arc<dyn MetadataStore>> {
    match &config.database.url {
        Some(url) => {
            let store = PgMetadataStore::connect(url, config.database.max_connections).await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("no database.url configured; using in-memory metadata store");
            Ok(Arc::new(MemoryMetadataStore::new()))
        }
    }
}

/// Initialize the OCR collaborator client. Without an endpoint every batch
/// fails at its first file, which keeps DB-less smoke runs honest.
pub(crate) fn init_ocr(config: &RuntimeConfig) -> Arc<dyn OcrClient> {
    match HttpOcrClient::from_config(&config.ocr) {
        Ok(client) => {
            info!(endpoint = %config.ocr.endpoint, "OCR collaborator configured");
            Arc::new(client)
        }
        Err(err) => {
            warn!(%err, "OCR collaborator not configured; extraction will fail");
            Arc::new(DisabledOcr)
        }
    }
}

/// Placeholder collaborator used when no endpoint is configured.
struct DisabledOcr;

#[async_trait]
impl OcrClient for DisabledOcr {
    async fn extract(&self, _filename: &str, _payload: &[u8]) -> Result<ExtractedDocument, OcrError> {
        Err(OcrError::Rejected {
            status: 0,
            message: "ocr endpoint not configured".to_string(),
        })
    }
}

/// Initialize tracing/logging from RuntimeConfig
pub(crate) fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.server.log_format {
        LogFormat::Json => {
            registry.with(fmt::layer().json()).init();
        }
        LogFormat::Text => {
            registry.with(fmt::layer()).init();
        }
    }
}
