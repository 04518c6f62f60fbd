//! Conversation title synthesis.
//!
//! Titles are generated at most once: an existing non-sentinel title is
//! returned untouched, with no model call.

use crate::chat::store::{Author, ConversationStore, Message, StoreError, SENTINEL_TITLE};
use crate::eid::Eid;
use crate::llm::{ChatModel, ModelError, ModelRequest};
use std::sync::Arc;

const TITLE_MAX_CHARS: usize = 100;
const TITLE_TEMPERATURE: f32 = 0.2;
const TITLE_MAX_OUTPUT_TOKENS: u32 = 20;

const TITLE_INSTRUCTION: &str = "Create a short, concise 2-5 word noun-phrase title \
for this conversation. Do not use quotation marks.";

#[derive(Debug, thiserror::Error)]
pub enum TitleError {
    #[error("no user message to derive a title from")]
    InsufficientContext,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleOutcome {
    /// A new title was synthesized and stored this call.
    Generated(String),
    /// The conversation already had a title; nothing happened.
    Unchanged(String),
}

pub struct TitleGenerator {
    model: Arc<dyn ChatModel>,
    store: Arc<dyn ConversationStore>,
}

impl TitleGenerator {
    pub fn new(model: Arc<dyn ChatModel>, store: Arc<dyn ConversationStore>) -> Self {
        Self { model, store }
    }

    /// Derive and store a title from `context` (a bounded slice of the
    /// conversation). Requires at least one user-authored message.
    pub async fn generate(
        &self,
        conversation: &Eid,
        context: &[Message],
    ) -> Result<TitleOutcome, TitleError> {
        let current = self.store.get_or_create(Some(conversation)).await?;
        if current.title != SENTINEL_TITLE {
            return Ok(TitleOutcome::Unchanged(current.title));
        }

        let first_user = context
            .iter()
            .find(|m| m.author == Author::User)
            .ok_or(TitleError::InsufficientContext)?;
        let first_assistant = context.iter().find(|m| m.author == Author::Assistant);

        let mut snippet = format!("User: {}", first_user.content);
        if let Some(reply) = first_assistant {
            snippet.push_str(&format!("\nAssistant: {}", reply.content));
        }

        let request = ModelRequest {
            prompt: format!("{TITLE_INSTRUCTION}\n\n{snippet}"),
            grounding: None,
            temperature: Some(TITLE_TEMPERATURE),
            max_output_tokens: Some(TITLE_MAX_OUTPUT_TOKENS),
        };

        let raw = self.model.generate(request).await?;
        let title = clean_title(&raw);

        let stored = self.store.set_title(conversation, &title).await?;
        log::debug!("generated title {stored:?} for conversation {conversation}");
        Ok(TitleOutcome::Generated(stored))
    }
}

/// Trim, cap at 100 characters, and fall back to the sentinel when the
/// model produced nothing usable.
fn clean_title(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return SENTINEL_TITLE.to_string();
    }
    match trimmed.char_indices().nth(TITLE_MAX_CHARS) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_title_trims_and_caps() {
        assert_eq!(clean_title("  Gene Panel Overview \n"), "Gene Panel Overview");

        let long = "x".repeat(300);
        assert_eq!(clean_title(&long).chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn clean_title_empty_falls_back_to_sentinel() {
        assert_eq!(clean_title("   \n"), SENTINEL_TITLE);
    }

    #[test]
    fn clean_title_respects_char_boundaries() {
        let long = "é".repeat(150);
        let cleaned = clean_title(&long);
        assert_eq!(cleaned.chars().count(), TITLE_MAX_CHARS);
    }
}
