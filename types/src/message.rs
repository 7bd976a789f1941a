//! New-architecture topics and messages.
//!
//! A message tree replaces the legacy linear log: `parent_id` links a
//! message to the one it answers, and a non-zero `siblings_group_id` groups
//! the responses different models gave to the same question.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::block::{BlockPayload, searchable_text};
use crate::ids::{AssistantId, MessageId, TopicId};
use crate::stats::MessageStats;

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Terminal status of a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Success,
    Error,
    Paused,
}

/// Inline block container stored on a message row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageData {
    #[serde(default)]
    pub blocks: Vec<BlockPayload>,
}

/// A persisted message in the new schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<MessageId>,
    pub topic_id: TopicId,
    pub role: Role,
    pub data: MessageData,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub searchable_text: Option<String>,
    pub status: MessageStatus,
    /// `0` for a single-model message, a positive per-topic group id when
    /// several models answered the same question.
    #[serde(default)]
    pub siblings_group_id: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub assistant_id: Option<AssistantId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub assistant_meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model_meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stats: Option<MessageStats>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Message {
    /// Recompute `searchable_text` from the current blocks.
    pub fn refresh_searchable_text(&mut self) {
        self.searchable_text = searchable_text(&self.data.blocks);
    }
}

/// A persisted topic in the new schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    #[serde(default)]
    pub is_name_manually_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub assistant_id: Option<AssistantId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub assistant_meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt: Option<String>,
    /// Tip of the conversation; where the next user message attaches.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub active_node_id: Option<MessageId>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub pinned_order: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A single entry of the conversation handed to the completions pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, MessageData, MessageStatus, Role};
    use crate::block::BlockPayload;

    #[test]
    fn refresh_searchable_text_joins_blocks() {
        let mut message = Message {
            id: "m1".into(),
            parent_id: None,
            topic_id: "t1".into(),
            role: Role::Assistant,
            data: MessageData {
                blocks: vec![
                    BlockPayload::MainText {
                        content: "a".into(),
                        references: Vec::new(),
                    },
                    BlockPayload::Thinking {
                        content: "b".into(),
                        thinking_ms: 1,
                    },
                ],
            },
            searchable_text: None,
            status: MessageStatus::Success,
            siblings_group_id: 0,
            assistant_id: None,
            assistant_meta: None,
            model_id: None,
            model_meta: None,
            trace_id: None,
            stats: None,
            created_at: 0,
            updated_at: 0,
        };
        message.refresh_searchable_text();
        assert_eq!(message.searchable_text.as_deref(), Some("a\nb"));
    }
}
