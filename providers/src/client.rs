//! The vendor-neutral API client contract.
//!
//! An [`ApiClient`] bundles everything vendor-specific: the request
//! transformer (core request → wire payload), the stateful response-chunk
//! transformer (vendor chunks → generic chunks), and the tool/message
//! conversion helpers the tool loop needs between rounds.

use async_trait::async_trait;
use serde_json::Value;

use hearth_types::{
    Assistant, ChatMessage, GenericChunk, McpTool, McpToolCall, McpToolResult, Model,
    ProviderKind, Role,
};

use crate::error::SdkError;
use crate::transport::RawSdkOutput;

/// A vendor-neutral completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionsRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<McpTool>,
}

/// Output of a request transformer.
#[derive(Debug, Clone)]
pub struct TransformedRequest {
    /// The full wire payload handed to `create_completions`.
    pub payload: Value,
    /// The vendor-shaped message list inside the payload; the tool loop
    /// extends this for recursive rounds.
    pub messages: Vec<Value>,
    pub metadata: Option<Value>,
}

/// Stateful vendor-chunk → generic-chunk transformer.
///
/// One instance lives per vendor round; `on_chunk` may emit zero or more
/// generic chunks per vendor chunk, and `on_end` flushes whatever the
/// vendor left implicit (trailing tool calls, the final
/// `LlmResponseComplete`).
pub trait ResponseChunkTransformer: Send {
    fn on_chunk(&mut self, chunk: &Value, out: &mut Vec<GenericChunk>);
    fn on_end(&mut self, out: &mut Vec<GenericChunk>);
}

/// Vendor bundle behind a uniform interface.
#[async_trait]
pub trait ApiClient: Send + Sync {
    fn provider_kind(&self) -> ProviderKind;

    /// Transform a core request into the vendor payload. Applies the
    /// assistant's context budget and per-model flag rules; on recursive
    /// tool rounds, `prebuilt_messages` substitutes for the conversation.
    fn transform_request(
        &self,
        request: &CompletionsRequest,
        assistant: &Assistant,
        model: &Model,
        is_recursive: bool,
        prebuilt_messages: Option<&[Value]>,
    ) -> Result<TransformedRequest, SdkError>;

    /// Fresh chunk transformer for one vendor round.
    fn response_chunk_transformer(&self) -> Box<dyn ResponseChunkTransformer>;

    /// Issue the vendor call.
    async fn create_completions(&self, payload: &Value) -> Result<RawSdkOutput, SdkError>;

    /// Build the next round's message list after tool execution.
    fn build_sdk_messages(
        &self,
        current_messages: &[Value],
        assistant_text: &str,
        tool_calls: &[McpToolCall],
        tool_results: &[McpToolResult],
        model: &Model,
    ) -> Vec<Value>;

    fn convert_mcp_tools_to_sdk_tools(&self, tools: &[McpTool]) -> Vec<Value>;

    fn convert_sdk_tool_call_to_mcp(
        &self,
        call: &Value,
        tools: &[McpTool],
    ) -> Option<McpToolCall>;

    fn convert_mcp_tool_response_to_sdk_message(
        &self,
        result: &McpToolResult,
        model: &Model,
    ) -> Value;

    /// Hook for vendors exposing event-emitter semantics on their raw
    /// output; used only to snapshot the final assistant message for
    /// recursive rounds. The default keeps the output untouched.
    fn attach_raw_stream_listener(&self, output: RawSdkOutput) -> RawSdkOutput {
        output
    }
}

/// Keep the newest messages within the assistant's context budget.
///
/// The front of the conversation is truncated first; the budget counts
/// messages, which is how the legacy product expressed it.
#[must_use]
pub fn truncate_to_context(messages: &[ChatMessage], assistant: &Assistant) -> Vec<ChatMessage> {
    match assistant.context_message_limit {
        Some(limit) if messages.len() > limit => messages[messages.len() - limit..].to_vec(),
        _ => messages.to_vec(),
    }
}

/// Wire role string shared by the OpenAI-compatible family.
#[must_use]
pub fn openai_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[cfg(test)]
mod tests {
    use hearth_types::{Assistant, ChatMessage};

    use super::truncate_to_context;

    #[test]
    fn truncation_keeps_the_newest_messages() {
        let mut assistant = Assistant::new("a1", "A");
        assistant.context_message_limit = Some(2);
        let messages = vec![
            ChatMessage::user("one"),
            ChatMessage::assistant("two"),
            ChatMessage::user("three"),
        ];
        let kept = truncate_to_context(&messages, &assistant);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].content, "two");
        assert_eq!(kept[1].content, "three");
    }

    #[test]
    fn no_limit_keeps_everything() {
        let assistant = Assistant::new("a1", "A");
        let messages = vec![ChatMessage::user("one")];
        assert_eq!(truncate_to_context(&messages, &assistant).len(), 1);
    }
}
