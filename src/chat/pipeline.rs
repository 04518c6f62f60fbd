//! The streaming response pipeline for one chat turn.
//!
//! A turn runs as a producer task pushing `ChatEvent`s into a bounded
//! channel that the transport drains in order. Chunks are forwarded as
//! they arrive from the model while the full answer accumulates for
//! persistence; the terminal `complete`/`error` event is always last.

use crate::chat::event::ChatEvent;
use crate::chat::store::{Author, Conversation, ConversationStore, Message, StoreError, SENTINEL_TITLE};
use crate::chat::title::{TitleGenerator, TitleOutcome};
use crate::eid::Eid;
use crate::grounding::{GroundingDoc, GroundingError, GroundingProvider};
use crate::llm::{ChatModel, ModelRequest};
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Upper bound on a user prompt, in characters.
pub const PROMPT_MAX_CHARS: usize = 10_000;

/// Messages of context handed to title synthesis.
const HISTORY_LIMIT: usize = 20;

/// Event channel capacity; backpressure pauses upstream consumption.
const EVENT_BUFFER: usize = 32;

/// Standing instructions prepended to every grounded answer request.
const SYSTEM_INSTRUCTIONS: &str = "\
You are an informational assistant. Ground every answer in the attached \
knowledge document; when the document does not cover a question, say so \
plainly instead of speculating. Keep answers concise, factual, and free \
of fabricated citations. Do not present internal model knowledge as if \
it came from the document.";

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("prompt must be between 1 and {PROMPT_MAX_CHARS} characters")]
    InvalidPrompt,

    #[error("conversation not found")]
    SessionNotFound,

    #[error("grounding context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("language model failed: {0}")]
    Model(String),

    #[error("conversation store failure: {0}")]
    Store(String),
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ChatError::SessionNotFound,
            StoreError::Backend(detail) => ChatError::Store(detail),
        }
    }
}

impl From<GroundingError> for ChatError {
    fn from(err: GroundingError) -> Self {
        let GroundingError::Unavailable(detail) = err;
        ChatError::ContextUnavailable(detail)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    pub user_prompt: String,
    #[serde(default)]
    pub conversation_id: Option<Eid>,
}

pub struct ChatPipeline {
    store: Arc<dyn ConversationStore>,
    model: Arc<dyn ChatModel>,
    grounding: Arc<dyn GroundingProvider>,
    titles: TitleGenerator,
}

impl ChatPipeline {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        model: Arc<dyn ChatModel>,
        grounding: Arc<dyn GroundingProvider>,
    ) -> Arc<Self> {
        let titles = TitleGenerator::new(model.clone(), store.clone());
        Arc::new(Self {
            store,
            model,
            grounding,
            titles,
        })
    }

    /// Run one turn. Everything up to and including the durable append
    /// of the user message happens here, so callers can map failures to
    /// protocol status codes before the stream starts; the rest of the
    /// turn runs as a spawned producer task behind the returned channel.
    pub async fn run(
        self: &Arc<Self>,
        request: ChatTurnRequest,
    ) -> Result<mpsc::Receiver<ChatEvent>, ChatError> {
        let prompt = request.user_prompt.trim().to_string();
        if prompt.is_empty() || request.user_prompt.chars().count() > PROMPT_MAX_CHARS {
            return Err(ChatError::InvalidPrompt);
        }

        let conversation = self
            .store
            .get_or_create(request.conversation_id.as_ref())
            .await?;

        // No partial answer without grounding; fail before side effects.
        let grounding = self.grounding.fetch().await?;

        let history = self
            .store
            .recent_history(&conversation.id, HISTORY_LIMIT)
            .await?;

        // Durable before the model is invoked, so the turn is never
        // lost to a model failure.
        let user_message = self
            .store
            .append_message(&conversation.id, Author::User, &prompt)
            .await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline
                .stream_turn(tx, conversation, history, user_message, grounding, prompt)
                .await;
        });

        Ok(rx)
    }

    async fn stream_turn(
        self: Arc<Self>,
        tx: mpsc::Sender<ChatEvent>,
        conversation: Conversation,
        history: Vec<Message>,
        user_message: Message,
        grounding: GroundingDoc,
        prompt: String,
    ) {
        let provisional_id = Eid::new();
        if tx
            .send(ChatEvent::Metadata {
                conversation_id: conversation.id.clone(),
                message_id: provisional_id,
            })
            .await
            .is_err()
        {
            // client gone before the first byte; nothing accumulated
            return;
        }

        let request = ModelRequest {
            prompt: format!("{SYSTEM_INSTRUCTIONS}\n\n{prompt}"),
            grounding: Some(grounding),
            temperature: None,
            max_output_tokens: None,
        };

        let mut chunks = match self.model.stream_answer(request).await {
            Ok(chunks) => chunks,
            Err(err) => {
                log::error!("model invocation failed: {err}");
                let _ = tx
                    .send(ChatEvent::Error {
                        error: err.to_string(),
                    })
                    .await;
                return;
            }
        };

        let mut full_response = String::new();
        let mut client_gone = false;
        let mut stream_failure: Option<String> = None;

        while let Some(item) = chunks.next().await {
            match item {
                Ok(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    full_response.push_str(&text);
                    if tx.send(ChatEvent::Content { content: text }).await.is_err() {
                        // receiver dropped: stop consuming upstream
                        // promptly; the partial answer is still saved.
                        client_gone = true;
                        break;
                    }
                }
                Err(err) => {
                    stream_failure = Some(err.to_string());
                    break;
                }
            }
        }

        if let Some(failure) = stream_failure {
            log::error!("model stream failed mid-turn: {failure}");
            let _ = tx.send(ChatEvent::Error { error: failure }).await;
            return;
        }

        let saved = match self
            .store
            .append_message(&conversation.id, Author::Assistant, &full_response)
            .await
        {
            Ok(message) => message,
            Err(err) => {
                log::error!("failed to persist assistant message: {err}");
                let _ = tx
                    .send(ChatEvent::Error {
                        error: ChatError::from(err).to_string(),
                    })
                    .await;
                return;
            }
        };

        let new_title_generated = if conversation.title == SENTINEL_TITLE {
            let mut turns = history;
            turns.push(user_message);
            turns.push(saved.clone());
            let context = title_context(&turns);

            // Title synthesis is an enhancement; its failure never
            // fails the turn.
            match self.titles.generate(&conversation.id, &context).await {
                Ok(TitleOutcome::Generated(_)) => true,
                Ok(TitleOutcome::Unchanged(_)) => false,
                Err(err) => {
                    log::warn!("title generation failed: {err}");
                    false
                }
            }
        } else {
            false
        };

        if !client_gone {
            let _ = tx
                .send(ChatEvent::Complete {
                    message_id: saved.id,
                    timestamp: saved.created_at,
                    new_title_generated,
                })
                .await;
        }
    }
}

/// Bounded, representative slice for title synthesis: the first two and
/// last four turns once history outgrows six, otherwise everything.
fn title_context(turns: &[Message]) -> Vec<Message> {
    if turns.len() > 6 {
        let mut picked = turns[..2].to_vec();
        picked.extend_from_slice(&turns[turns.len() - 4..]);
        picked
    } else {
        turns.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(n: usize) -> Message {
        Message {
            id: Eid::new(),
            author: if n % 2 == 0 {
                Author::User
            } else {
                Author::Assistant
            },
            content: format!("turn {n}"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn short_history_is_kept_whole() {
        let turns: Vec<_> = (0..6).map(message).collect();
        let context = title_context(&turns);
        assert_eq!(context.len(), 6);
        assert_eq!(context[0].content, "turn 0");
        assert_eq!(context[5].content, "turn 5");
    }

    #[test]
    fn long_history_keeps_first_two_and_last_four() {
        let turns: Vec<_> = (0..10).map(message).collect();
        let context = title_context(&turns);
        assert_eq!(context.len(), 6);
        assert_eq!(context[0].content, "turn 0");
        assert_eq!(context[1].content, "turn 1");
        assert_eq!(context[2].content, "turn 6");
        assert_eq!(context[5].content, "turn 9");
    }
}
