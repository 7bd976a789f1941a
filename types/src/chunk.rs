//! The generic chunk: the sole currency between middlewares and the block
//! manager.
//!
//! The set is closed and versioned: adding a variant is a schema change
//! visible to every callback consumer, so new chunk kinds must extend the
//! enum here rather than smuggling data through an existing variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stats::{Metrics, Usage};
use crate::tool::{McpToolCall, McpToolResult};

/// Where web-search results came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSearchSource {
    /// The provider executed the search natively (server-side tool).
    Provider,
    /// A built-in tool executed by the application.
    Builtin,
}

/// Collected web-search output attached to a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchResults {
    pub source: WebSearchSource,
    pub results: Value,
}

/// Terminal error payload of a chunk stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<Value>,
}

impl ChunkError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
        }
    }

    /// Error message used when the caller aborted the completion; block-level
    /// handling treats it as a pause, not a failure.
    pub const PAUSE_PLACEHOLDER: &'static str = "pause_placeholder";

    #[must_use]
    pub fn aborted() -> Self {
        Self::new(Self::PAUSE_PLACEHOLDER)
    }

    #[must_use]
    pub fn is_abort(&self) -> bool {
        self.message == Self::PAUSE_PLACEHOLDER
    }
}

/// Accumulated response data carried by the final [`GenericChunk::BlockComplete`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompletionsSummary {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metrics: Option<Metrics>,
}

/// One increment of streaming output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenericChunk {
    /// The vendor accepted the request and a response is underway.
    LlmResponseCreated {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        response_id: Option<String>,
    },
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        text: String,
        /// Milliseconds since the first thinking delta of this run.
        #[serde(default)]
        thinking_millsec: u64,
    },
    /// Closes a contiguous thinking segment; carries the full accumulated text.
    ThinkingComplete {
        text: String,
        #[serde(default)]
        thinking_millsec: u64,
    },
    LlmWebSearchInProgress,
    LlmWebSearchComplete {
        results: WebSearchResults,
    },
    /// Tool calls the model requested. Intercepted by the tool loop and never
    /// forwarded to the consumer.
    McpToolCreated {
        tool_calls: Vec<McpToolCall>,
    },
    McpToolInProgress {
        responses: Vec<McpToolResult>,
    },
    ImageCreated,
    ImageComplete {
        image: Value,
    },
    /// One vendor round finished; carries that round's usage and metrics.
    LlmResponseComplete {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        usage: Option<Usage>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        metrics: Option<Metrics>,
    },
    /// The whole user-facing call finished. Emitted exactly once per
    /// top-level call, never from recursive tool rounds.
    BlockComplete {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        response: Option<CompletionsSummary>,
    },
    Error {
        error: ChunkError,
    },
}

impl GenericChunk {
    /// Stable wire tag of this variant.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            GenericChunk::LlmResponseCreated { .. } => "llm_response_created",
            GenericChunk::TextDelta { .. } => "text_delta",
            GenericChunk::ThinkingDelta { .. } => "thinking_delta",
            GenericChunk::ThinkingComplete { .. } => "thinking_complete",
            GenericChunk::LlmWebSearchInProgress => "llm_web_search_in_progress",
            GenericChunk::LlmWebSearchComplete { .. } => "llm_web_search_complete",
            GenericChunk::McpToolCreated { .. } => "mcp_tool_created",
            GenericChunk::McpToolInProgress { .. } => "mcp_tool_in_progress",
            GenericChunk::ImageCreated => "image_created",
            GenericChunk::ImageComplete { .. } => "image_complete",
            GenericChunk::LlmResponseComplete { .. } => "llm_response_complete",
            GenericChunk::BlockComplete { .. } => "block_complete",
            GenericChunk::Error { .. } => "error",
        }
    }

    #[must_use]
    pub fn text_delta(text: impl Into<String>) -> Self {
        GenericChunk::TextDelta { text: text.into() }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        GenericChunk::Error {
            error: ChunkError::new(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GenericChunk;

    #[test]
    fn chunk_serializes_with_snake_case_tag() {
        let chunk = GenericChunk::ThinkingDelta {
            text: "hm".into(),
            thinking_millsec: 12,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "thinking_delta");
        assert_eq!(json["thinking_millsec"], 12);
    }

    #[test]
    fn tag_matches_serialized_type_field() {
        let chunks = [
            GenericChunk::LlmResponseCreated { response_id: None },
            GenericChunk::text_delta("x"),
            GenericChunk::ImageCreated,
            GenericChunk::BlockComplete { response: None },
            GenericChunk::error("boom"),
        ];
        for chunk in chunks {
            let json = serde_json::to_value(&chunk).unwrap();
            assert_eq!(json["type"], chunk.tag());
        }
    }
}
