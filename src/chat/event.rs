//! Wire events for one streamed chat turn.
//!
//! Per turn the client sees exactly one `metadata`, zero or more
//! `content`, then exactly one of `complete` | `error`.

use crate::eid::Eid;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    #[serde(rename_all = "camelCase")]
    Metadata {
        conversation_id: Eid,
        /// Provisional assistant message id; the persisted id arrives
        /// with `complete`.
        message_id: Eid,
    },
    Content {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        message_id: Eid,
        timestamp: DateTime<Utc>,
        new_title_generated: bool,
    },
    Error {
        error: String,
    },
}
