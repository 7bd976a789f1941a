//! Typed content blocks.
//!
//! A message holds an ordered list of blocks. While a response streams, each
//! block carries identity and a lifecycle status ([`Block`]); the persisted
//! form ([`BlockPayload`]) is just the typed content.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{BlockId, MessageId};

/// Lifecycle status of a block while its message streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Pending,
    Processing,
    Streaming,
    Success,
    Error,
    Paused,
}

impl BlockStatus {
    /// Terminal statuses survive persistence; the rest are forced to a
    /// terminal status when a task is finalized.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BlockStatus::Success | BlockStatus::Error | BlockStatus::Paused
        )
    }
}

/// Where a content reference was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Web,
    Knowledge,
    Memory,
}

/// Citation material merged into the first `main_text` block of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentReference {
    pub kind: ReferenceKind,
    pub payload: Value,
}

/// Persisted block content, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockPayload {
    MainText {
        content: String,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        references: Vec<ContentReference>,
    },
    Thinking {
        content: String,
        #[serde(rename = "thinkingMs", default)]
        thinking_ms: u64,
    },
    Translation {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        source_language: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        target_language: Option<String>,
    },
    Code {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        language: Option<String>,
    },
    Image {
        #[serde(rename = "fileId", skip_serializing_if = "Option::is_none", default)]
        file_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        url: Option<String>,
    },
    File {
        #[serde(rename = "fileId")]
        file_id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        name: Option<String>,
    },
    Video {
        #[serde(rename = "fileId", skip_serializing_if = "Option::is_none", default)]
        file_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        url: Option<String>,
    },
    Tool {
        #[serde(rename = "toolId")]
        tool_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        arguments: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        content: Option<Value>,
    },
    Citation {
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        references: Vec<ContentReference>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        details: Option<Value>,
    },
    Compact {
        content: String,
        #[serde(rename = "compactedCount", default)]
        compacted_count: u32,
    },
    /// Placeholder opened on `LlmResponseCreated`, before the first chunk
    /// reveals what the response actually contains. Never persisted.
    Unknown,
}

impl BlockPayload {
    #[must_use]
    pub fn kind(&self) -> BlockKind {
        match self {
            BlockPayload::MainText { .. } => BlockKind::MainText,
            BlockPayload::Thinking { .. } => BlockKind::Thinking,
            BlockPayload::Translation { .. } => BlockKind::Translation,
            BlockPayload::Code { .. } => BlockKind::Code,
            BlockPayload::Image { .. } => BlockKind::Image,
            BlockPayload::File { .. } => BlockKind::File,
            BlockPayload::Video { .. } => BlockKind::Video,
            BlockPayload::Tool { .. } => BlockKind::Tool,
            BlockPayload::Citation { .. } => BlockKind::Citation,
            BlockPayload::Error { .. } => BlockKind::Error,
            BlockPayload::Compact { .. } => BlockKind::Compact,
            BlockPayload::Unknown => BlockKind::Unknown,
        }
    }

    /// Text content contributing to a message's searchable text, if any.
    #[must_use]
    pub fn searchable_content(&self) -> Option<&str> {
        match self {
            BlockPayload::MainText { content, .. }
            | BlockPayload::Thinking { content, .. }
            | BlockPayload::Translation { content, .. }
            | BlockPayload::Code { content, .. }
            | BlockPayload::Compact { content, .. } => Some(content),
            _ => None,
        }
    }
}

/// Discriminant of [`BlockPayload`], used for transition tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    MainText,
    Thinking,
    Translation,
    Code,
    Image,
    File,
    Video,
    Tool,
    Citation,
    Error,
    Compact,
    Unknown,
}

/// A block while its message is streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(rename = "messageId")]
    pub message_id: MessageId,
    pub status: BlockStatus,
    #[serde(flatten)]
    pub payload: BlockPayload,
}

impl Block {
    #[must_use]
    pub fn new(id: BlockId, message_id: MessageId, payload: BlockPayload) -> Self {
        Self {
            id,
            message_id,
            status: BlockStatus::Processing,
            payload,
        }
    }

    #[must_use]
    pub fn kind(&self) -> BlockKind {
        self.payload.kind()
    }
}

/// Newline-joined concatenation of text-bearing block contents.
#[must_use]
pub fn searchable_text(blocks: &[BlockPayload]) -> Option<String> {
    let parts: Vec<&str> = blocks
        .iter()
        .filter_map(BlockPayload::searchable_content)
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}
