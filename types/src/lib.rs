//! Core domain types for Hearth.
//!
//! Everything here is plain data: no IO, no async, no clocks. Ids are
//! string-backed newtypes, messages form a parent/sibling tree, blocks are a
//! real sum type, and [`GenericChunk`] is the closed event set the streaming
//! pipeline speaks.

mod assistant;
mod block;
mod chunk;
mod ids;
mod message;
mod provider;
mod stats;
mod tool;

pub use assistant::Assistant;
pub use block::{
    Block, BlockKind, BlockPayload, BlockStatus, ContentReference, ReferenceKind, searchable_text,
};
pub use chunk::{
    ChunkError, CompletionsSummary, GenericChunk, WebSearchResults, WebSearchSource,
};
pub use ids::{AssistantId, BlockId, MessageId, TopicId};
pub use message::{ChatMessage, Message, MessageData, MessageStatus, Role, Topic};
pub use provider::{Model, ProviderConfig, ProviderKind, ReasoningEffort};
pub use stats::{MessageStats, Metrics, Usage};
pub use tool::{
    BUILTIN_KNOWLEDGE_SEARCH_TOOL, BUILTIN_WEB_SEARCH_TOOL, McpTool, McpToolCall, McpToolResult,
    is_citation_producing_tool,
};
