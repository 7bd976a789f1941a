//! Legacy record shapes as they appear in the exported tables and the
//! persisted state.
//!
//! Fields mirror the export's camelCase keys. Records are lenient by
//! design: the legacy stores accumulated years of schema drift, so almost
//! everything is optional and unknown fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A topic row from the exported `topics` table. Authoritative for its
/// message list; its display metadata may be stale.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTopic {
    pub id: String,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub messages: Vec<LegacyMessage>,
    #[serde(default)]
    pub pinned: Option<bool>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub updated_at: Option<Value>,
    #[serde(default)]
    pub is_name_manually_edited: Option<bool>,
}

/// Topic metadata nested under a legacy assistant. Authoritative for
/// display metadata and (via its parent) the owning assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTopicMeta {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pinned: Option<bool>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub is_name_manually_edited: Option<bool>,
    #[serde(default)]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub updated_at: Option<Value>,
}

/// A message inside a legacy topic.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMessage {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub topic_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub updated_at: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub model: Option<Value>,
    /// Links an assistant message to the user message it answers.
    #[serde(default)]
    pub ask_id: Option<String>,
    /// Marks the chosen response when several assistants answered the same
    /// `ask_id`.
    #[serde(default)]
    pub fold_selected: Option<bool>,
    /// Ordered block-id references into the `message_blocks` table.
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub mentions: Option<Vec<Value>>,
    #[serde(default)]
    pub usage: Option<Value>,
    #[serde(default)]
    pub metrics: Option<Value>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl LegacyMessage {
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == "user"
    }

    #[must_use]
    pub fn fold_selected(&self) -> bool {
        self.fold_selected.unwrap_or(false)
    }
}

/// A legacy assistant from persisted state, carrying its topic metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAssistant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub topics: Vec<LegacyTopicMeta>,
    /// Everything else the assistant carried travels along unchanged.
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}
