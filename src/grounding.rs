//! The fixed knowledge document that grounds every answer.
//!
//! Fetched once per process and cached; a failed fetch is not cached,
//! so the next turn retries.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::OnceCell;

const FETCH_TIMEOUT_MS: u64 = 30_000;

pub type GroundingFuture<'a> =
    Pin<Box<dyn Future<Output = Result<GroundingDoc, GroundingError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum GroundingError {
    #[error("grounding document unreachable: {0}")]
    Unavailable(String),
}

/// Document content ready to inline into a model request.
#[derive(Debug, Clone)]
pub struct GroundingDoc {
    pub data_base64: String,
    pub mime_type: String,
}

pub trait GroundingProvider: Send + Sync {
    fn fetch<'a>(&'a self) -> GroundingFuture<'a>;
}

/// Downloads the configured document and keeps the encoded bytes for
/// the life of the process.
pub struct RemoteDocument {
    client: reqwest::Client,
    url: String,
    mime_type: String,
    cached: OnceCell<GroundingDoc>,
}

impl RemoteDocument {
    pub fn new(url: &str, mime_type: &str) -> Result<Self, GroundingError> {
        if url.is_empty() {
            return Err(GroundingError::Unavailable(
                "grounding.document_url is not configured".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(FETCH_TIMEOUT_MS))
            .build()
            .map_err(|e| GroundingError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            mime_type: mime_type.to_string(),
            cached: OnceCell::new(),
        })
    }

    async fn download(&self) -> Result<GroundingDoc, GroundingError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| GroundingError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GroundingError::Unavailable(format!(
                "fetch returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GroundingError::Unavailable(e.to_string()))?;

        log::info!("fetched grounding document ({} bytes)", bytes.len());
        Ok(GroundingDoc {
            data_base64: STANDARD.encode(&bytes),
            mime_type: self.mime_type.clone(),
        })
    }
}

impl GroundingProvider for RemoteDocument {
    fn fetch<'a>(&'a self) -> GroundingFuture<'a> {
        Box::pin(async move {
            self.cached
                .get_or_try_init(|| self.download())
                .await
                .cloned()
        })
    }
}
