use super::stubs::{StubEmbedder, StubIndex};
use crate::embeddings::Embedder;
use crate::index::VectorIndex;
use crate::ingest::{ensure_ingested, load_corpus};
use std::io::Write;
use std::sync::Arc;

#[tokio::test]
async fn populated_index_is_left_untouched() {
    let embedder = Arc::new(StubEmbedder::new());
    let index = Arc::new(StubIndex::default());
    let questions = vec!["What is a genome?".to_string()];

    let embedder_dyn: Arc<dyn Embedder> = embedder.clone();
    let index_dyn: Arc<dyn VectorIndex> = index.clone();
    let report = ensure_ingested(&embedder_dyn, &index_dyn, &questions, 50)
        .await
        .unwrap();

    assert!(report.skipped);
    assert_eq!(report.written, 0);
    assert_eq!(embedder.call_count(), 0);
    assert_eq!(index.upsert_count(), 0);
}

#[tokio::test]
async fn empty_index_is_filled_in_batches() {
    let embedder = Arc::new(StubEmbedder::new());
    let index = Arc::new(StubIndex::empty_index());
    let questions: Vec<String> = (0..120).map(|i| format!("question text {i}")).collect();

    let embedder_dyn: Arc<dyn Embedder> = embedder.clone();
    let index_dyn: Arc<dyn VectorIndex> = index.clone();
    let report = ensure_ingested(&embedder_dyn, &index_dyn, &questions, 50)
        .await
        .unwrap();

    assert!(!report.skipped);
    assert_eq!(report.written, 120);
    assert_eq!(embedder.call_count(), 3);
    assert_eq!(index.upsert_count(), 3);

    let records = index.upserted.lock().unwrap();
    assert_eq!(records.len(), 120);
    assert_eq!(records[0].id, "question-0");
    assert_eq!(records[119].id, "question-119");
    assert_eq!(records[7].metadata.text.as_deref(), Some("question text 7"));
    assert_eq!(records[7].metadata.source.as_deref(), Some("knowledge-corpus"));
    assert_eq!(
        records[7].metadata.kind.as_deref(),
        Some("suggestion_question")
    );
}

#[test]
fn corpus_loader_skips_blanks_and_comments() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# suggestion corpus").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "  What is a gene panel?  ").unwrap();
    writeln!(file, "How long does sequencing take?").unwrap();
    writeln!(file, "   ").unwrap();
    file.flush().unwrap();

    let questions = load_corpus(file.path()).unwrap();
    assert_eq!(
        questions,
        vec![
            "What is a gene panel?".to_string(),
            "How long does sequencing take?".to_string(),
        ]
    );
}
