//! Remote nearest-neighbor vector index.
//!
//! The index is an external shared service; this module speaks its REST
//! API. No retry policy lives here — transport failures surface as
//! `IndexError::Unavailable` and the caller decides.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

pub type IndexFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, IndexError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    #[error("vector index rejected the request: {0}")]
    Rejected(String),
}

/// Metadata blob stored alongside each vector. `text` may be absent on
/// records written by other tooling; callers handle that explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// A record to upsert: id, vector, metadata.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// A query hit with its similarity score.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Option<RecordMetadata>,
}

/// Process-wide shared nearest-neighbor store of (vector, metadata)
/// records, cosine metric.
pub trait VectorIndex: Send + Sync {
    /// Idempotent creation; safe under concurrent cold starts.
    fn ensure_exists<'a>(&'a self) -> IndexFuture<'a, ()>;
    fn is_empty<'a>(&'a self) -> IndexFuture<'a, bool>;
    /// Batch write; re-upsert with the same id overwrites.
    fn upsert<'a>(&'a self, records: Vec<CorpusRecord>) -> IndexFuture<'a, ()>;
    /// Up to `top_k` records ordered by descending similarity.
    fn query<'a>(&'a self, vector: Vec<f32>, top_k: usize) -> IndexFuture<'a, Vec<ScoredMatch>>;
}

/// REST client for a serverless vector database.
pub struct HttpVectorIndex {
    client: reqwest::Client,
    api_base: String,
    index_name: String,
    api_key: String,
    dimension: usize,
}

impl HttpVectorIndex {
    pub fn new(
        api_base: &str,
        index_name: &str,
        api_key: &str,
        dimension: usize,
    ) -> Result<Self, IndexError> {
        if api_base.is_empty() {
            return Err(IndexError::Rejected(
                "vector_index.api_base is not configured".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            index_name: index_name.to_string(),
            api_key: api_key.to_string(),
            dimension,
        })
    }

    fn index_url(&self, path: &str) -> String {
        format!("{}/indexes/{}/{path}", self.api_base, self.index_name)
    }

    async fn post(
        &self,
        url: String,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, IndexError> {
        self.client
            .post(url)
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))
    }
}

async fn reject(response: reqwest::Response) -> IndexError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = body.chars().take(300).collect::<String>();
    if status.is_server_error() {
        IndexError::Unavailable(format!("{status}: {detail}"))
    } else {
        IndexError::Rejected(format!("{status}: {detail}"))
    }
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(rename = "totalRecordCount", default)]
    total_record_count: u64,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<ScoredMatch>,
}

impl VectorIndex for HttpVectorIndex {
    fn ensure_exists<'a>(&'a self) -> IndexFuture<'a, ()> {
        Box::pin(async move {
            let body = json!({
                "name": self.index_name,
                "dimension": self.dimension,
                "metric": "cosine",
            });
            let response = self.post(format!("{}/indexes", self.api_base), body).await?;

            // A concurrent cold start may have created it first.
            if response.status() == StatusCode::CONFLICT {
                return Ok(());
            }
            if !response.status().is_success() {
                return Err(reject(response).await);
            }
            log::info!("created vector index {}", self.index_name);
            Ok(())
        })
    }

    fn is_empty<'a>(&'a self) -> IndexFuture<'a, bool> {
        Box::pin(async move {
            let response = self.post(self.index_url("stats"), json!({})).await?;
            if !response.status().is_success() {
                return Err(reject(response).await);
            }
            let stats: StatsResponse = response
                .json()
                .await
                .map_err(|e| IndexError::Unavailable(e.to_string()))?;
            Ok(stats.total_record_count == 0)
        })
    }

    fn upsert<'a>(&'a self, records: Vec<CorpusRecord>) -> IndexFuture<'a, ()> {
        Box::pin(async move {
            if records.is_empty() {
                return Ok(());
            }
            let body = json!({ "vectors": records });
            let response = self.post(self.index_url("vectors/upsert"), body).await?;
            if !response.status().is_success() {
                return Err(reject(response).await);
            }
            Ok(())
        })
    }

    fn query<'a>(&'a self, vector: Vec<f32>, top_k: usize) -> IndexFuture<'a, Vec<ScoredMatch>> {
        Box::pin(async move {
            let body = json!({
                "vector": vector,
                "topK": top_k,
                "includeMetadata": true,
            });
            let response = self.post(self.index_url("query"), body).await?;
            if !response.status().is_success() {
                return Err(reject(response).await);
            }
            let parsed: QueryResponse = response
                .json()
                .await
                .map_err(|e| IndexError::Unavailable(e.to_string()))?;

            let mut matches = parsed.matches;
            // The service returns hits in score order already; keep the
            // contract honest regardless.
            matches.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            matches.truncate(top_k);
            Ok(matches)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_missing_text_deserializes() {
        let raw = r#"{"id": "question-3", "score": 0.41, "metadata": {"source": "corpus"}}"#;
        let parsed: ScoredMatch = serde_json::from_str(raw).unwrap();
        assert!(parsed.metadata.unwrap().text.is_none());
    }

    #[test]
    fn match_without_metadata_deserializes() {
        let raw = r#"{"id": "question-3", "score": 0.41}"#;
        let parsed: ScoredMatch = serde_json::from_str(raw).unwrap();
        assert!(parsed.metadata.is_none());
    }

    #[test]
    fn corpus_record_serializes_type_key() {
        let record = CorpusRecord {
            id: "question-0".to_string(),
            values: vec![0.1, 0.2],
            metadata: RecordMetadata {
                text: Some("What is a genome?".to_string()),
                source: Some("knowledge-corpus".to_string()),
                kind: Some("suggestion_question".to_string()),
            },
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["metadata"]["type"], "suggestion_question");
    }
}
