use super::stubs::{StubEmbedder, StubIndex};
use crate::index::{RecordMetadata, ScoredMatch};
use crate::suggest::{SuggestError, SuggestionEngine, SuggestionSession, SuggestionSessions};
use std::sync::Arc;
use std::time::Duration;

fn hit(id: &str, score: f32, text: Option<&str>) -> ScoredMatch {
    ScoredMatch {
        id: id.to_string(),
        score,
        metadata: Some(RecordMetadata {
            text: text.map(str::to_string),
            source: Some("knowledge-corpus".to_string()),
            kind: Some("suggestion_question".to_string()),
        }),
    }
}

fn engine_with(
    matches: Vec<ScoredMatch>,
) -> (Arc<SuggestionEngine>, Arc<StubEmbedder>, Arc<StubIndex>) {
    let embedder = Arc::new(StubEmbedder::new());
    let index = Arc::new(StubIndex::with_matches(matches));
    let engine = Arc::new(SuggestionEngine::new(
        embedder.clone(),
        index.clone(),
        0.35,
        3,
    ));
    (engine, embedder, index)
}

#[tokio::test]
async fn blank_query_short_circuits() {
    let (engine, embedder, index) = engine_with(vec![hit("question-0", 0.9, Some("hit"))]);

    let suggestions = engine.suggest("   \t ").await.unwrap();

    assert!(suggestions.is_empty());
    assert_eq!(embedder.call_count(), 0);
    assert_eq!(index.query_count(), 0);
}

#[tokio::test]
async fn threshold_and_missing_text_filter_hits() {
    let (engine, _, _) = engine_with(vec![
        hit("question-0", 0.91, Some("What is a gene panel?")),
        ScoredMatch {
            id: "question-1".to_string(),
            score: 0.80,
            metadata: None,
        },
        hit("question-2", 0.50, Some("How does sequencing work?")),
        hit("question-3", 0.20, Some("below the threshold")),
    ]);

    let suggestions = engine.suggest("gene panel").await.unwrap();

    assert_eq!(
        suggestions,
        vec![
            "What is a gene panel?".to_string(),
            "How does sequencing work?".to_string(),
        ]
    );
}

#[tokio::test]
async fn results_are_capped_at_top_k() {
    let matches = (0..6)
        .map(|i| hit(&format!("question-{i}"), 0.9 - i as f32 * 0.05, Some("q")))
        .collect();
    let (engine, _, _) = engine_with(matches);

    let suggestions = engine.suggest("anything").await.unwrap();
    assert_eq!(suggestions.len(), 3);
}

#[tokio::test]
async fn dead_end_prefix_skips_extensions() {
    let (engine, _, index) = engine_with(vec![]);
    let session = SuggestionSession::new(engine, Duration::from_millis(400));

    assert!(session.lookup("xylo").await.unwrap().is_empty());
    assert_eq!(index.query_count(), 1);

    // extensions of a confirmed-empty prefix never reach the index
    assert!(session.lookup("xylophone").await.unwrap().is_empty());
    assert!(session.lookup("XYLOPHONE lessons").await.unwrap().is_empty());
    assert_eq!(index.query_count(), 1);

    // a query outside the prefix clears the entry and looks up again
    session.lookup("gene").await.unwrap();
    assert_eq!(index.query_count(), 2);

    // the old prefix no longer applies once cleared
    session.lookup("xylo").await.unwrap();
    assert_eq!(index.query_count(), 3);
}

#[tokio::test]
async fn successful_lookup_sets_no_dead_end() {
    let (engine, _, index) = engine_with(vec![hit("question-0", 0.9, Some("found"))]);
    let session = SuggestionSession::new(engine, Duration::from_millis(400));

    assert_eq!(session.lookup("gen").await.unwrap().len(), 1);
    assert_eq!(session.lookup("gene").await.unwrap().len(), 1);
    assert_eq!(index.query_count(), 2);
}

#[tokio::test]
async fn collaborator_failures_surface_as_errors() {
    let index = Arc::new(StubIndex {
        fail_queries: true,
        ..Default::default()
    });
    let engine = SuggestionEngine::new(Arc::new(StubEmbedder::new()), index, 0.35, 3);
    assert!(matches!(
        engine.suggest("gene").await,
        Err(SuggestError::Index(_))
    ));

    let engine = SuggestionEngine::new(
        Arc::new(super::stubs::FailingEmbedder),
        Arc::new(StubIndex::default()),
        0.35,
        3,
    );
    assert!(matches!(
        engine.suggest("gene").await,
        Err(SuggestError::Embedding(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn debounce_drops_superseded_input() {
    let (engine, _, index) = engine_with(vec![hit("question-0", 0.9, Some("found"))]);
    let session = SuggestionSession::new(engine, Duration::from_millis(400));

    let (first, second) = tokio::join!(session.input("gen"), session.input("gene"));

    assert!(first.is_none());
    let results = second.expect("latest input must resolve").unwrap();
    assert_eq!(results, vec!["found".to_string()]);
    assert_eq!(index.query_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn spaced_inputs_both_resolve() {
    let (engine, _, index) = engine_with(vec![hit("question-0", 0.9, Some("found"))]);
    let session = SuggestionSession::new(engine, Duration::from_millis(400));

    assert!(session.input("gen").await.is_some());
    assert!(session.input("gene").await.is_some());
    assert_eq!(index.query_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_clients_do_not_supersede_each_other() {
    let (engine, _, index) = engine_with(vec![hit("question-0", 0.9, Some("found"))]);
    let registry = SuggestionSessions::new(engine, Duration::from_millis(400));
    let client_a = registry.session("client-a");
    let client_b = registry.session("client-b");

    let (left, right) = tokio::join!(client_a.input("gene"), client_b.input("protein"));

    let left = left.expect("client-a input must resolve").unwrap();
    let right = right.expect("client-b input must resolve").unwrap();
    assert_eq!(left, vec!["found".to_string()]);
    assert_eq!(right, vec!["found".to_string()]);
    assert_eq!(index.query_count(), 2);
}

#[tokio::test]
async fn dead_end_state_is_scoped_to_its_client() {
    let (engine, _, index) = engine_with(vec![]);
    let registry = SuggestionSessions::new(engine, Duration::from_millis(400));

    // client-a confirms a dead end; its next lookup is skipped
    registry.session("client-a").lookup("xylo").await.unwrap();
    assert!(registry
        .session("client-a")
        .lookup("xylophone")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(index.query_count(), 1);

    // client-b is unaffected by client-a's dead end
    registry.session("client-b").lookup("xylophone").await.unwrap();
    assert_eq!(index.query_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn idle_sessions_are_dropped() {
    let (engine, _, index) = engine_with(vec![]);
    let registry = SuggestionSessions::new(engine, Duration::from_millis(400));

    registry.session("client-a").lookup("xylo").await.unwrap();
    assert_eq!(index.query_count(), 1);

    tokio::time::advance(Duration::from_secs(11 * 60)).await;

    // the expired session's dead-end prefix no longer applies
    registry.session("client-a").lookup("xylophone").await.unwrap();
    assert_eq!(index.query_count(), 2);
}
