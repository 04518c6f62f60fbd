//! Embedding generation for suggestion queries and corpus ingestion.
//!
//! `FastembedProvider` wraps a local fastembed model:
//! - one-time lazy initialization, coalesced across concurrent callers
//! - a failed initialization is cached and never silently retried
//! - inference runs on the blocking pool; output is unit-normalized

use fastembed::{InitOptions, TextEmbedding};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;

pub type EmbedderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, EmbeddingError>> + Send + 'a>>;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("embedding generation failed: {0}")]
    EmbeddingFailure(String),

    #[error("invalid embedding model name: {0}")]
    InvalidModel(String),
}

/// Turns text into fixed-length unit vectors.
pub trait Embedder: Send + Sync {
    fn embed<'a>(&'a self, text: &'a str) -> EmbedderFuture<'a, Vec<f32>>;
    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> EmbedderFuture<'a, Vec<Vec<f32>>>;
    /// Vector length this embedder produces.
    fn dimension(&self) -> usize;
}

type SharedModel = Arc<Mutex<TextEmbedding>>;

/// Local embedding model backed by fastembed.
///
/// The underlying model is loaded at most once per process. Concurrent
/// first calls coalesce on the `OnceCell`; the stored `Result` keeps a
/// failed load failing fast instead of re-downloading per request.
pub struct FastembedProvider {
    model_name: String,
    cache_dir: PathBuf,
    dimension: usize,
    download_timeout: Duration,
    model: OnceCell<Result<SharedModel, String>>,
}

impl FastembedProvider {
    /// `cache_dir` is the base data directory; model files land under
    /// its `models/` subdirectory.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        dimension: usize,
        download_timeout: Duration,
    ) -> Self {
        Self {
            model_name: model_name.to_string(),
            cache_dir,
            dimension,
            download_timeout,
            model: OnceCell::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn shared_model(&self) -> Result<SharedModel, EmbeddingError> {
        let loaded = self
            .model
            .get_or_init(|| {
                let model_name = self.model_name.clone();
                let cache_dir = self.cache_dir.clone();
                let download_timeout = self.download_timeout;
                async move {
                    log::info!("initializing embedding model {model_name}");
                    let load =
                        tokio::task::spawn_blocking(move || load_model(&model_name, &cache_dir));
                    match tokio::time::timeout(download_timeout, load).await {
                        Err(_) => Err(format!(
                            "model load timed out after {}s",
                            download_timeout.as_secs()
                        )),
                        Ok(joined) => joined
                            .map_err(|e| e.to_string())?
                            .map(|model| Arc::new(Mutex::new(model)))
                            .map_err(|e| e.to_string()),
                    }
                }
            })
            .await;

        match loaded {
            Ok(model) => Ok(model.clone()),
            Err(err) => Err(EmbeddingError::ModelUnavailable(err.clone())),
        }
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.shared_model().await?;
        let expected = self.dimension;

        let embeddings = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|e| EmbeddingError::EmbeddingFailure(format!("model lock poisoned: {e}")))?;
            guard
                .embed(texts, None)
                .map_err(|e| EmbeddingError::EmbeddingFailure(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::EmbeddingFailure(e.to_string()))??;

        embeddings
            .into_iter()
            .map(|mut vector| {
                if vector.len() != expected {
                    return Err(EmbeddingError::EmbeddingFailure(format!(
                        "model produced {}-dim vector, expected {expected}",
                        vector.len()
                    )));
                }
                normalize(&mut vector);
                Ok(vector)
            })
            .collect()
    }
}

impl Embedder for FastembedProvider {
    fn embed<'a>(&'a self, text: &'a str) -> EmbedderFuture<'a, Vec<f32>> {
        Box::pin(async move {
            let mut vectors = self.embed_texts(vec![text.to_string()]).await?;
            vectors
                .pop()
                .ok_or_else(|| EmbeddingError::EmbeddingFailure("no embedding returned".to_string()))
        })
    }

    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> EmbedderFuture<'a, Vec<Vec<f32>>> {
        Box::pin(async move {
            if texts.is_empty() {
                return Ok(vec![]);
            }
            self.embed_texts(texts.to_vec()).await
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn load_model(model_name: &str, cache_dir: &PathBuf) -> Result<TextEmbedding, EmbeddingError> {
    let model_enum = parse_model_name(model_name)?;

    let models_dir = cache_dir.join("models");
    std::fs::create_dir_all(&models_dir).map_err(|e| {
        EmbeddingError::ModelUnavailable(format!("failed to create models directory: {e}"))
    })?;

    let options = InitOptions::new(model_enum)
        .with_cache_dir(models_dir)
        .with_show_download_progress(false);

    TextEmbedding::try_new(options).map_err(|e| EmbeddingError::ModelUnavailable(e.to_string()))
}

/// Parse model name string to fastembed enum.
fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
        "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" | "bgelargeenv15" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        _ => Err(EmbeddingError::InvalidModel(format!(
            "unknown model: {name}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5"
        ))),
    }
}

/// Scale to unit length so downstream similarity is a plain dot product.
/// Zero vectors are left untouched.
fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_model_name() {
        assert!(matches!(
            parse_model_name("nonexistent-model"),
            Err(EmbeddingError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_parse_known_models() {
        assert!(parse_model_name("all-MiniLM-L6-v2").is_ok());
        assert!(parse_model_name("bge-base-en-v1.5").is_ok());
    }

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_untouched() {
        let mut v = vec![0.0, 0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    /// Model download is slow; run with --ignored.
    #[tokio::test]
    #[ignore = "requires model download"]
    async fn test_embedding_generation() {
        let temp_dir = std::env::temp_dir().join("askdoc-embed-test");
        let provider = FastembedProvider::new(
            "all-MiniLM-L6-v2",
            temp_dir.clone(),
            384,
            Duration::from_secs(300),
        );

        let embedding = provider.embed("Hello, world!").await.unwrap();
        assert_eq!(embedding.len(), 384);

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);

        let _ = std::fs::remove_dir_all(&temp_dir);
    }
}
