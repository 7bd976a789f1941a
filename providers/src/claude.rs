//! Claude client.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use hearth_types::{
    Assistant, ChunkError, GenericChunk, McpTool, McpToolCall, McpToolResult, Model,
    ProviderKind, Role, Usage, WebSearchResults, WebSearchSource,
};

use crate::client::{
    ApiClient, CompletionsRequest, ResponseChunkTransformer, TransformedRequest,
    truncate_to_context,
};
use crate::error::SdkError;
use crate::transport::{RawSdkOutput, SdkRequest, SdkTransport};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const WEB_SEARCH_TOOL_TYPE: &str = "web_search_20250305";

pub struct ClaudeClient {
    config: hearth_types::ProviderConfig,
    transport: Arc<dyn SdkTransport>,
}

impl ClaudeClient {
    #[must_use]
    pub fn new(config: hearth_types::ProviderConfig, transport: Arc<dyn SdkTransport>) -> Self {
        Self { config, transport }
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/messages")
    }
}

#[async_trait]
impl ApiClient for ClaudeClient {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn transform_request(
        &self,
        request: &CompletionsRequest,
        assistant: &Assistant,
        model: &Model,
        is_recursive: bool,
        prebuilt_messages: Option<&[Value]>,
    ) -> Result<TransformedRequest, SdkError> {
        let messages = match (is_recursive, prebuilt_messages) {
            (true, Some(prebuilt)) => prebuilt.to_vec(),
            _ => {
                // System content travels out-of-band; history maps to
                // user/assistant turns (system turns hoist into the prompt).
                truncate_to_context(&request.messages, assistant)
                    .iter()
                    .filter(|m| m.role != Role::System)
                    .map(|m| {
                        json!({
                            "role": if m.role == Role::User { "user" } else { "assistant" },
                            "content": m.content,
                        })
                    })
                    .collect()
            }
        };

        let mut body = Map::new();
        body.insert("model".into(), json!(model.id));
        body.insert("max_tokens".into(), json!(DEFAULT_MAX_TOKENS));
        body.insert("stream".into(), json!(true));
        body.insert("messages".into(), Value::Array(messages.clone()));

        if let Some(prompt) = assistant.prompt.as_deref()
            && !prompt.trim().is_empty()
        {
            body.insert("system".into(), json!(prompt));
        }

        if let Some(temperature) = assistant.temperature
            && model.accepts_temperature()
            // Claude rejects temperature together with extended thinking.
            && assistant.thinking_budget.is_none()
        {
            body.insert("temperature".into(), json!(temperature));
        }

        if let Some(budget) = assistant.thinking_budget
            && model.supports_reasoning
        {
            body.insert(
                "thinking".into(),
                json!({"type": "enabled", "budget_tokens": budget}),
            );
        }

        let mut tools = self.convert_mcp_tools_to_sdk_tools(&request.tools);
        if assistant.enable_web_search && model.supports_web_search {
            tools.push(json!({
                "type": WEB_SEARCH_TOOL_TYPE,
                "name": "web_search",
            }));
        }
        if !tools.is_empty() {
            body.insert("tools".into(), Value::Array(tools));
        }

        Ok(TransformedRequest {
            payload: Value::Object(body),
            messages,
            metadata: None,
        })
    }

    fn response_chunk_transformer(&self) -> Box<dyn ResponseChunkTransformer> {
        Box::new(ClaudeTransformer::default())
    }

    async fn create_completions(&self, payload: &Value) -> Result<RawSdkOutput, SdkError> {
        let request = SdkRequest {
            url: self.endpoint(),
            headers: vec![
                ("x-api-key", self.config.api_key.clone()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            body: payload.clone(),
            stream: payload.get("stream").and_then(Value::as_bool).unwrap_or(false),
        };
        self.transport.send(request).await
    }

    fn build_sdk_messages(
        &self,
        current_messages: &[Value],
        assistant_text: &str,
        tool_calls: &[McpToolCall],
        tool_results: &[McpToolResult],
        model: &Model,
    ) -> Vec<Value> {
        let mut messages = current_messages.to_vec();

        let mut assistant_content: Vec<Value> = Vec::new();
        if !assistant_text.is_empty() {
            assistant_content.push(json!({"type": "text", "text": assistant_text}));
        }
        for call in tool_calls {
            assistant_content.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.arguments,
            }));
        }
        messages.push(json!({"role": "assistant", "content": assistant_content}));

        // All results of one round return in a single user turn.
        let results: Vec<Value> = tool_results
            .iter()
            .map(|result| self.convert_mcp_tool_response_to_sdk_message(result, model))
            .collect();
        messages.push(json!({"role": "user", "content": results}));
        messages
    }

    fn convert_mcp_tools_to_sdk_tools(&self, tools: &[McpTool]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect()
    }

    fn convert_sdk_tool_call_to_mcp(
        &self,
        call: &Value,
        _tools: &[McpTool],
    ) -> Option<McpToolCall> {
        Some(McpToolCall {
            id: call.get("id")?.as_str()?.to_string(),
            name: call.get("name")?.as_str()?.to_string(),
            arguments: call.get("input").cloned().unwrap_or(Value::Null),
        })
    }

    fn convert_mcp_tool_response_to_sdk_message(
        &self,
        result: &McpToolResult,
        _model: &Model,
    ) -> Value {
        let content = match &result.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        json!({
            "type": "tool_result",
            "tool_use_id": result.call_id,
            "content": content,
            "is_error": result.is_error,
        })
    }
}

// ── streaming ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PendingToolUse {
    id: String,
    name: String,
    input_json: String,
}

#[derive(Default)]
struct ClaudeTransformer {
    pending_tool: Option<PendingToolUse>,
    tool_calls: Vec<McpToolCall>,
    prompt_tokens: u64,
    completion_tokens: u64,
    saw_usage: bool,
    finished: bool,
}

impl ClaudeTransformer {
    fn flush(&mut self, out: &mut Vec<GenericChunk>) {
        if self.finished {
            return;
        }
        self.finished = true;
        let tool_calls = std::mem::take(&mut self.tool_calls);
        if !tool_calls.is_empty() {
            out.push(GenericChunk::McpToolCreated { tool_calls });
        }
        let usage = self.saw_usage.then(|| Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.prompt_tokens + self.completion_tokens,
            thoughts_tokens: None,
            cost: None,
        });
        out.push(GenericChunk::LlmResponseComplete {
            usage,
            metrics: None,
        });
    }
}

impl ResponseChunkTransformer for ClaudeTransformer {
    fn on_chunk(&mut self, chunk: &Value, out: &mut Vec<GenericChunk>) {
        match chunk.get("type").and_then(Value::as_str).unwrap_or("") {
            "message_start" => {
                if let Some(input) = chunk
                    .pointer("/message/usage/input_tokens")
                    .and_then(Value::as_u64)
                {
                    self.prompt_tokens = input;
                    self.saw_usage = true;
                }
            }
            "content_block_start" => {
                match chunk
                    .pointer("/content_block/type")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                {
                    "tool_use" => {
                        self.pending_tool = Some(PendingToolUse {
                            id: chunk
                                .pointer("/content_block/id")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            name: chunk
                                .pointer("/content_block/name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            input_json: String::new(),
                        });
                    }
                    "server_tool_use" => out.push(GenericChunk::LlmWebSearchInProgress),
                    "web_search_tool_result" => {
                        out.push(GenericChunk::LlmWebSearchComplete {
                            results: WebSearchResults {
                                source: WebSearchSource::Provider,
                                results: chunk
                                    .pointer("/content_block/content")
                                    .cloned()
                                    .unwrap_or(Value::Null),
                            },
                        });
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                match chunk.pointer("/delta/type").and_then(Value::as_str).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = chunk.pointer("/delta/text").and_then(Value::as_str) {
                            out.push(GenericChunk::text_delta(text));
                        }
                    }
                    "thinking_delta" => {
                        if let Some(text) =
                            chunk.pointer("/delta/thinking").and_then(Value::as_str)
                        {
                            out.push(GenericChunk::ThinkingDelta {
                                text: text.to_string(),
                                thinking_millsec: 0,
                            });
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) =
                            chunk.pointer("/delta/partial_json").and_then(Value::as_str)
                            && let Some(pending) = self.pending_tool.as_mut()
                        {
                            pending.input_json.push_str(partial);
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                if let Some(pending) = self.pending_tool.take() {
                    let arguments =
                        serde_json::from_str(&pending.input_json).unwrap_or(Value::Null);
                    self.tool_calls.push(McpToolCall {
                        id: pending.id,
                        name: pending.name,
                        arguments,
                    });
                }
            }
            "message_delta" => {
                if let Some(output) = chunk
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_u64)
                {
                    self.completion_tokens = output;
                    self.saw_usage = true;
                }
            }
            "message_stop" => self.flush(out),
            "error" => {
                let message = chunk
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error");
                out.push(GenericChunk::Error {
                    error: ChunkError::new(message),
                });
                self.finished = true;
            }
            _ => {}
        }
    }

    fn on_end(&mut self, out: &mut Vec<GenericChunk>) {
        self.flush(out);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};

    use hearth_types::{Assistant, ChatMessage, GenericChunk, ProviderConfig, ProviderKind};

    use super::ClaudeClient;
    use crate::client::{ApiClient, CompletionsRequest};
    use crate::error::SdkError;
    use crate::transport::{RawSdkOutput, SdkRequest, SdkTransport};

    struct NullTransport;

    #[async_trait::async_trait]
    impl SdkTransport for NullTransport {
        async fn send(&self, _request: SdkRequest) -> Result<RawSdkOutput, SdkError> {
            Ok(RawSdkOutput::Single(Value::Null))
        }
    }

    fn client() -> ClaudeClient {
        ClaudeClient::new(
            ProviderConfig {
                id: "p1".into(),
                kind: ProviderKind::Claude,
                api_key: "key".into(),
                base_url: None,
                api_version: None,
            },
            Arc::new(NullTransport),
        )
    }

    #[test]
    fn system_prompt_travels_out_of_band() {
        let client = client();
        let mut assistant = Assistant::new("a1", "A");
        assistant.prompt = Some("be helpful".into());
        let model = hearth_types::Model::named("claude-sonnet-4-5");
        let request = CompletionsRequest {
            messages: vec![ChatMessage::system("summary"), ChatMessage::user("hi")],
            tools: Vec::new(),
        };

        let out = client
            .transform_request(&request, &assistant, &model, false, None)
            .unwrap();
        assert_eq!(out.payload["system"], "be helpful");
        let messages = out.payload["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn thinking_budget_disables_temperature() {
        let client = client();
        let mut assistant = Assistant::new("a1", "A");
        assistant.temperature = Some(0.7);
        assistant.thinking_budget = Some(2048);
        let mut model = hearth_types::Model::named("claude-sonnet-4-5");
        model.supports_reasoning = true;

        let out = client
            .transform_request(
                &CompletionsRequest {
                    messages: vec![ChatMessage::user("hi")],
                    tools: Vec::new(),
                },
                &assistant,
                &model,
                false,
                None,
            )
            .unwrap();
        assert_eq!(out.payload["thinking"]["budget_tokens"], 2048);
        assert!(out.payload.get("temperature").is_none());
    }

    #[test]
    fn stream_assembles_tool_use_and_usage() {
        let client = client();
        let mut transformer = client.response_chunk_transformer();
        let mut out = Vec::new();

        transformer.on_chunk(
            &json!({"type": "message_start", "message": {"usage": {"input_tokens": 11}}}),
            &mut out,
        );
        transformer.on_chunk(
            &json!({"type": "content_block_delta", "delta": {"type": "thinking_delta", "thinking": "hm"}}),
            &mut out,
        );
        transformer.on_chunk(
            &json!({"type": "content_block_start", "index": 1,
                    "content_block": {"type": "tool_use", "id": "tu_1", "name": "search"}}),
            &mut out,
        );
        transformer.on_chunk(
            &json!({"type": "content_block_delta", "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}}),
            &mut out,
        );
        transformer.on_chunk(
            &json!({"type": "content_block_delta", "delta": {"type": "input_json_delta", "partial_json": "\"x\"}"}}),
            &mut out,
        );
        transformer.on_chunk(&json!({"type": "content_block_stop", "index": 1}), &mut out);
        transformer.on_chunk(
            &json!({"type": "message_delta", "usage": {"output_tokens": 9}}),
            &mut out,
        );
        transformer.on_chunk(&json!({"type": "message_stop"}), &mut out);
        // A second end must not duplicate the completion chunk.
        transformer.on_end(&mut out);

        assert!(matches!(&out[0], GenericChunk::ThinkingDelta { text, .. } if text == "hm"));
        let GenericChunk::McpToolCreated { tool_calls } = &out[1] else {
            panic!("expected tool chunk, got {out:?}");
        };
        assert_eq!(tool_calls[0].id, "tu_1");
        assert_eq!(tool_calls[0].arguments["q"], "x");
        let GenericChunk::LlmResponseComplete { usage, .. } = &out[2] else {
            panic!("expected completion chunk");
        };
        let usage = usage.unwrap();
        assert_eq!(usage.prompt_tokens, 11);
        assert_eq!(usage.total_tokens, 20);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn tool_round_trip_builds_next_messages() {
        let client = client();
        let model = hearth_types::Model::named("claude-sonnet-4-5");
        let call = hearth_types::McpToolCall {
            id: "tu_1".into(),
            name: "search".into(),
            arguments: json!({"q": "x"}),
        };
        let result = hearth_types::McpToolResult::success(&call, json!("res"));
        let current = vec![json!({"role": "user", "content": "hi"})];

        let next = client.build_sdk_messages(&current, "looking", &[call], &[result], &model);
        assert_eq!(next.len(), 3);
        assert_eq!(next[1]["role"], "assistant");
        assert_eq!(next[1]["content"][1]["type"], "tool_use");
        assert_eq!(next[2]["role"], "user");
        assert_eq!(next[2]["content"][0]["tool_use_id"], "tu_1");
    }
}
