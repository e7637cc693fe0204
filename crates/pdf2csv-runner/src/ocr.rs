// OCR collaborator client
//
// The extraction service is reached only through this trait; tests and the
// reprocess path plug in their own implementations.

use async_trait::async_trait;
use pdf2csv_config::OcrConfig;
use pdf2csv_core::ExtractedDocument;
use std::time::Duration;
use tracing::debug;

use crate::error::OcrError;

#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Submit one document and get its extracted entities back.
    async fn extract(&self, filename: &str, payload: &[u8]) -> Result<ExtractedDocument, OcrError>;
}

/// HTTP client for the extraction endpoint. Documents go up as multipart
/// form data; entities come back as JSON.
pub struct HttpOcrClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpOcrClient {
    pub fn from_config(config: &OcrConfig) -> Result<Self, OcrError> {
        if config.endpoint.is_empty() {
            return Err(OcrError::Config("ocr.endpoint is not set".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| OcrError::Config(err.to_string()))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn extract(&self, filename: &str, payload: &[u8]) -> Result<ExtractedDocument, OcrError> {
        debug!(filename, bytes = payload.len(), "submitting document for extraction");

        let part = reqwest::multipart::Part::bytes(payload.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/pdf")
            .map_err(|err| OcrError::Config(err.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut request = self.http.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| OcrError::Unavailable(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<ExtractedDocument>()
                .await
                .map_err(|err| OcrError::InvalidResponse(err.to_string()))
        } else if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            Err(OcrError::Rejected {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(OcrError::Unavailable(format!(
                "extraction endpoint returned {}",
                status
            )))
        }
    }
}
