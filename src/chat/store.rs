//! Conversation persistence boundary.
//!
//! The relational store is an external collaborator; the core only
//! depends on the `ConversationStore` trait. `MemoryStore` backs the
//! daemon and the tests.

use crate::eid::Eid;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

/// Title value meaning "not yet generated". Once a conversation carries
/// anything else, the title is frozen.
pub const SENTINEL_TITLE: &str = "New chat";

const PREVIEW_MAX_CHARS: usize = 80;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conversation not found")]
    NotFound,

    #[error("conversation store failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
}

/// One stored turn half.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Eid,
    pub author: Author,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation identity plus the fields the pipeline decides on.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Eid,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationListItem {
    pub id: Eid,
    pub title: String,
    pub preview: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub trait ConversationStore: Send + Sync {
    /// Without an id: create a fresh conversation (sentinel title, empty
    /// history). With one: load it or fail with `NotFound`.
    fn get_or_create<'a>(&'a self, id: Option<&'a Eid>) -> StoreFuture<'a, Conversation>;

    /// Append-only write; returns the stored record with server-assigned
    /// id and timestamp.
    fn append_message<'a>(
        &'a self,
        conversation: &'a Eid,
        author: Author,
        content: &'a str,
    ) -> StoreFuture<'a, Message>;

    /// Oldest-first, at most `limit` messages.
    fn recent_history<'a>(
        &'a self,
        conversation: &'a Eid,
        limit: usize,
    ) -> StoreFuture<'a, Vec<Message>>;

    /// Writes the title unless one is already set; returns the title
    /// actually stored afterwards.
    fn set_title<'a>(&'a self, conversation: &'a Eid, title: &'a str) -> StoreFuture<'a, String>;

    /// All conversations, most recently updated first.
    fn list<'a>(&'a self) -> StoreFuture<'a, Vec<ConversationListItem>>;
}

#[derive(Debug)]
struct ConversationRecord {
    title: String,
    messages: Vec<Message>,
    updated_at: DateTime<Utc>,
}

/// In-memory conversation store.
#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<Eid, ConversationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Eid, ConversationRecord>>, StoreError> {
        self.conversations
            .read()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Eid, ConversationRecord>>, StoreError> {
        self.conversations
            .write()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))
    }
}

impl ConversationStore for MemoryStore {
    fn get_or_create<'a>(&'a self, id: Option<&'a Eid>) -> StoreFuture<'a, Conversation> {
        Box::pin(async move {
            match id {
                Some(id) => {
                    let conversations = self.read()?;
                    let record = conversations.get(id).ok_or(StoreError::NotFound)?;
                    Ok(Conversation {
                        id: id.clone(),
                        title: record.title.clone(),
                    })
                }
                None => {
                    let id = Eid::new();
                    let mut conversations = self.write()?;
                    conversations.insert(
                        id.clone(),
                        ConversationRecord {
                            title: SENTINEL_TITLE.to_string(),
                            messages: Vec::new(),
                            updated_at: Utc::now(),
                        },
                    );
                    Ok(Conversation {
                        id,
                        title: SENTINEL_TITLE.to_string(),
                    })
                }
            }
        })
    }

    fn append_message<'a>(
        &'a self,
        conversation: &'a Eid,
        author: Author,
        content: &'a str,
    ) -> StoreFuture<'a, Message> {
        Box::pin(async move {
            let mut conversations = self.write()?;
            let record = conversations
                .get_mut(conversation)
                .ok_or(StoreError::NotFound)?;

            let message = Message {
                id: Eid::new(),
                author,
                content: content.to_string(),
                created_at: Utc::now(),
            };
            record.messages.push(message.clone());
            record.updated_at = message.created_at;
            Ok(message)
        })
    }

    fn recent_history<'a>(
        &'a self,
        conversation: &'a Eid,
        limit: usize,
    ) -> StoreFuture<'a, Vec<Message>> {
        Box::pin(async move {
            let conversations = self.read()?;
            let record = conversations
                .get(conversation)
                .ok_or(StoreError::NotFound)?;
            Ok(record.messages.iter().take(limit).cloned().collect())
        })
    }

    fn set_title<'a>(&'a self, conversation: &'a Eid, title: &'a str) -> StoreFuture<'a, String> {
        Box::pin(async move {
            let mut conversations = self.write()?;
            let record = conversations
                .get_mut(conversation)
                .ok_or(StoreError::NotFound)?;

            if record.title == SENTINEL_TITLE {
                record.title = title.to_string();
            }
            Ok(record.title.clone())
        })
    }

    fn list<'a>(&'a self) -> StoreFuture<'a, Vec<ConversationListItem>> {
        Box::pin(async move {
            let conversations = self.read()?;
            let mut items = conversations
                .iter()
                .map(|(id, record)| ConversationListItem {
                    id: id.clone(),
                    title: record.title.clone(),
                    preview: record.messages.first().map(|m| preview(&m.content)),
                    updated_at: record.updated_at,
                })
                .collect::<Vec<_>>();
            items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(items)
        })
    }
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_MAX_CHARS) {
        Some((idx, _)) => content[..idx].to_string(),
        None => content.to_string(),
    }
}
