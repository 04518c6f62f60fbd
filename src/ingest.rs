//! Bulk ingestion of the suggestion corpus into the vector index.
//!
//! Idempotent: the index's own existence and emptiness are the
//! "already ingested" marker, so concurrent daemons and repeated runs
//! converge without an in-process flag.

use crate::embeddings::{Embedder, EmbeddingError};
use crate::index::{CorpusRecord, IndexError, RecordMetadata, VectorIndex};
use std::path::Path;
use std::sync::Arc;

const CORPUS_SOURCE: &str = "knowledge-corpus";
const RECORD_KIND: &str = "suggestion_question";

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// The index already had records and was left untouched.
    pub skipped: bool,
    pub written: usize,
}

/// Load the corpus file: one question per line, blank lines and
/// `#` comments ignored.
pub fn load_corpus(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read corpus {}: {e}", path.display()))?;

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Embed and upsert `questions` unless the index is already populated.
pub async fn ensure_ingested(
    embedder: &Arc<dyn Embedder>,
    index: &Arc<dyn VectorIndex>,
    questions: &[String],
    batch_size: usize,
) -> Result<IngestReport, IngestError> {
    index.ensure_exists().await?;

    if !index.is_empty().await? {
        log::info!("vector index already populated, skipping ingestion");
        return Ok(IngestReport {
            skipped: true,
            written: 0,
        });
    }

    log::info!("ingesting {} corpus questions", questions.len());

    let mut written = 0;
    for (batch_start, batch) in questions
        .chunks(batch_size)
        .enumerate()
        .map(|(i, batch)| (i * batch_size, batch))
    {
        let embeddings = embedder.embed_batch(batch).await?;

        let records = batch
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(offset, (question, values))| CorpusRecord {
                id: format!("question-{}", batch_start + offset),
                values,
                metadata: RecordMetadata {
                    text: Some(question.clone()),
                    source: Some(CORPUS_SOURCE.to_string()),
                    kind: Some(RECORD_KIND.to_string()),
                },
            })
            .collect::<Vec<_>>();

        written += records.len();
        index.upsert(records).await?;

        log::info!("ingestion progress: {written}/{}", questions.len());
    }

    Ok(IngestReport {
        skipped: false,
        written,
    })
}
