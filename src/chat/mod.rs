//! One chat turn, end to end: conversation state, the streaming
//! response pipeline, and title synthesis.

mod event;
mod pipeline;
mod store;
mod title;

pub use event::ChatEvent;
pub use pipeline::{ChatError, ChatPipeline, ChatTurnRequest, PROMPT_MAX_CHARS};
pub use store::{
    Author, Conversation, ConversationListItem, ConversationStore, MemoryStore, Message,
    StoreError, StoreFuture, SENTINEL_TITLE,
};
pub use title::{TitleError, TitleGenerator, TitleOutcome};
