//! Live "did you mean" question suggestions.
//!
//! - `SuggestionEngine`: embed the query, ask the vector index for the
//!   nearest corpus questions, keep the ones above the similarity
//!   threshold.
//! - `SuggestionSession`: per-client state for a live input stream —
//!   debouncing plus a dead-end prefix cache that skips lookups while
//!   the user keeps extending a query already confirmed to have no
//!   matches.

use crate::embeddings::{Embedder, EmbeddingError};
use crate::index::{IndexError, VectorIndex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum SuggestError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub struct SuggestionEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    threshold: f32,
    top_k: usize,
}

impl SuggestionEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        threshold: f32,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            threshold,
            top_k,
        }
    }

    /// Suggest up to the configured `top_k` corpus questions for `query`.
    ///
    /// Empty or whitespace-only queries return an empty list without
    /// touching the embedder or the index. Hits below the similarity
    /// threshold and hits whose stored metadata lacks display text are
    /// dropped.
    pub async fn suggest(&self, query: &str) -> Result<Vec<String>, SuggestError> {
        self.suggest_top(query, self.top_k).await
    }

    pub async fn suggest_top(&self, query: &str, top_k: usize) -> Result<Vec<String>, SuggestError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(vec![]);
        }

        let embedding = self.embedder.embed(query).await?;
        let matches = self.index.query(embedding, top_k).await?;

        let suggestions = matches
            .into_iter()
            .filter(|m| m.score >= self.threshold)
            .filter_map(|m| m.metadata.and_then(|meta| meta.text))
            .collect::<Vec<_>>();

        log::debug!(
            "suggest: {} hit(s) above threshold for {query:?}",
            suggestions.len()
        );
        Ok(suggestions)
    }
}

/// How long a client's session survives without input.
const SESSION_IDLE_TTL: Duration = Duration::from_secs(10 * 60);
/// Cap on live sessions; past it the stalest one is evicted.
const MAX_SESSIONS: usize = 1024;

/// Live sessions keyed by an opaque client-supplied id. Debounce and
/// dead-end state belong to one input stream, so each client gets its
/// own `SuggestionSession`; sessions idle past the TTL are dropped.
pub struct SuggestionSessions {
    engine: Arc<SuggestionEngine>,
    quiet_period: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

struct SessionEntry {
    session: Arc<SuggestionSession>,
    last_seen: Instant,
}

impl SuggestionSessions {
    pub fn new(engine: Arc<SuggestionEngine>, quiet_period: Duration) -> Self {
        Self {
            engine,
            quiet_period,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Stateless access for callers with no input stream to scope to.
    pub fn engine(&self) -> &Arc<SuggestionEngine> {
        &self.engine
    }

    /// Fetch or create the session for `key`, refreshing its idle timer.
    pub fn session(&self, key: &str) -> Arc<SuggestionSession> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = Instant::now();
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) < SESSION_IDLE_TTL);

        if sessions.len() >= MAX_SESSIONS && !sessions.contains_key(key) {
            let stalest = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(key, _)| key.clone());
            if let Some(stalest) = stalest {
                sessions.remove(&stalest);
            }
        }

        let entry = sessions
            .entry(key.to_string())
            .or_insert_with(|| SessionEntry {
                session: Arc::new(SuggestionSession::new(
                    self.engine.clone(),
                    self.quiet_period,
                )),
                last_seen: now,
            });
        entry.last_seen = now;
        entry.session.clone()
    }
}

/// Per-client suggestion state for one live input stream.
///
/// Tracks the most recent "dead-end" prefix — a query that came back
/// with zero matches. Any case-insensitive extension of it is assumed
/// empty too and skipped outright; the entry is cleared as soon as the
/// live query stops extending it. This is a cost optimization only: it
/// never suppresses results for queries outside a confirmed-empty
/// prefix.
pub struct SuggestionSession {
    engine: Arc<SuggestionEngine>,
    quiet_period: Duration,
    generation: AtomicU64,
    dead_end: Mutex<Option<String>>,
}

impl SuggestionSession {
    pub fn new(engine: Arc<SuggestionEngine>, quiet_period: Duration) -> Self {
        Self {
            engine,
            quiet_period,
            generation: AtomicU64::new(0),
            dead_end: Mutex::new(None),
        }
    }

    /// Debounced entry point for keystroke-level input. Waits out the
    /// quiet period and yields `None` when a newer input superseded
    /// this one before the timer fired.
    pub async fn input(&self, raw: &str) -> Option<Result<Vec<String>, SuggestError>> {
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.quiet_period).await;
        if self.generation.load(Ordering::SeqCst) != my_generation {
            return None;
        }
        Some(self.lookup(raw).await)
    }

    /// Undebounced lookup with the dead-end prefix discipline applied.
    pub async fn lookup(&self, raw: &str) -> Result<Vec<String>, SuggestError> {
        let query = raw.trim();
        if query.is_empty() {
            return Ok(vec![]);
        }

        let lowered = query.to_lowercase();
        {
            let mut dead_end = self
                .dead_end
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match dead_end.as_deref() {
                Some(prefix) if lowered.starts_with(prefix) => {
                    log::trace!("suggest: skipping dead-end extension {query:?}");
                    return Ok(vec![]);
                }
                Some(_) => {
                    // stopped extending the confirmed-empty prefix
                    *dead_end = None;
                }
                None => {}
            }
        }

        let results = self.engine.suggest(query).await?;
        if results.is_empty() {
            let mut dead_end = self
                .dead_end
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *dead_end = Some(lowered);
        }
        Ok(results)
    }
}
