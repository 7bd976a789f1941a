//! OpenAI-compatible client: chat-completions and responses API.
//!
//! Azure is a configuration variant: same wire format, different URL
//! scheme and auth header.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use hearth_types::{
    Assistant, ChunkError, GenericChunk, McpTool, McpToolCall, McpToolResult, Model,
    ProviderKind, Usage, WebSearchResults, WebSearchSource,
};

use crate::client::{
    ApiClient, CompletionsRequest, ResponseChunkTransformer, TransformedRequest, openai_role,
    truncate_to_context,
};
use crate::error::SdkError;
use crate::transport::{RawSdkOutput, SdkRequest, SdkTransport};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

pub struct OpenAiClient {
    config: hearth_types::ProviderConfig,
    transport: Arc<dyn SdkTransport>,
}

impl OpenAiClient {
    #[must_use]
    pub fn new(config: hearth_types::ProviderConfig, transport: Arc<dyn SdkTransport>) -> Self {
        Self { config, transport }
    }

    fn uses_responses_api(&self) -> bool {
        self.config.kind == ProviderKind::OpenAiResponses
    }

    fn is_azure(&self) -> bool {
        self.config.kind == ProviderKind::AzureOpenAi
    }

    fn endpoint(&self, payload: &Value) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        if self.is_azure() {
            let deployment = payload
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let api_version = self
                .config
                .api_version
                .as_deref()
                .unwrap_or(DEFAULT_AZURE_API_VERSION);
            return format!(
                "{base}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
            );
        }
        if self.uses_responses_api() {
            format!("{base}/responses")
        } else {
            format!("{base}/chat/completions")
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        if self.is_azure() {
            vec![("api-key", self.config.api_key.clone())]
        } else {
            vec![("Authorization", format!("Bearer {}", self.config.api_key))]
        }
    }

    fn chat_messages(
        &self,
        request: &CompletionsRequest,
        assistant: &Assistant,
    ) -> Vec<Value> {
        let mut messages = Vec::new();
        if let Some(prompt) = assistant.prompt.as_deref()
            && !prompt.trim().is_empty()
        {
            messages.push(json!({"role": "system", "content": prompt}));
        }
        for message in truncate_to_context(&request.messages, assistant) {
            messages.push(json!({
                "role": openai_role(message.role),
                "content": message.content,
            }));
        }
        messages
    }
}

#[async_trait]
impl ApiClient for OpenAiClient {
    fn provider_kind(&self) -> ProviderKind {
        self.config.kind
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
            _ => self.chat_messages(request, assistant),
        };

        let mut body = Map::new();
        body.insert("model".into(), json!(model.id));
        body.insert("stream".into(), json!(true));

        if self.uses_responses_api() {
            body.insert("input".into(), Value::Array(messages.clone()));
            if let Some(prompt) = assistant.prompt.as_deref()
                && !prompt.trim().is_empty()
                && !is_recursive
            {
                // The responses API takes instructions out-of-band; drop the
                // inline system item to avoid sending the prompt twice.
                body.insert("instructions".into(), json!(prompt));
            }
            if let Some(effort) = assistant.reasoning_effort
                && model.supports_reasoning
            {
                body.insert("reasoning".into(), json!({"effort": effort.as_str()}));
            }
        } else {
            body.insert("messages".into(), Value::Array(messages.clone()));
            body.insert("stream_options".into(), json!({"include_usage": true}));
            if let Some(effort) = assistant.reasoning_effort
                && model.supports_reasoning
            {
                body.insert("reasoning_effort".into(), json!(effort.as_str()));
            }
        }

        if let Some(temperature) = assistant.temperature
            && model.accepts_temperature()
        {
            body.insert("temperature".into(), json!(temperature));
        }

        let mut tools = self.convert_mcp_tools_to_sdk_tools(&request.tools);
        if assistant.enable_web_search && model.supports_web_search {
            if self.uses_responses_api() {
                tools.push(json!({"type": "web_search"}));
            } else {
                body.insert("web_search_options".into(), json!({}));
            }
        }
        if !tools.is_empty() {
            body.insert("tools".into(), Value::Array(tools));
        }

        // Responses-API system handling removed the inline item above.
        let messages = if self.uses_responses_api() && !is_recursive {
            messages
                .into_iter()
                .filter(|m| m.get("role").and_then(Value::as_str) != Some("system"))
                .collect()
        } else {
            messages
        };
        let mut body = Value::Object(body);
        if self.uses_responses_api() {
            body["input"] = Value::Array(messages.clone());
        }

        Ok(TransformedRequest {
            payload: body,
            messages,
            metadata: None,
        })
    }

    fn response_chunk_transformer(&self) -> Box<dyn ResponseChunkTransformer> {
        if self.uses_responses_api() {
            Box::new(ResponsesTransformer::default())
        } else {
            Box::new(ChatCompletionsTransformer::default())
        }
    }

    async fn create_completions(&self, payload: &Value) -> Result<RawSdkOutput, SdkError> {
        let request = SdkRequest {
            url: self.endpoint(payload),
            headers: self.headers(),
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

        if self.uses_responses_api() {
            for call in tool_calls {
                messages.push(json!({
                    "type": "function_call",
                    "call_id": call.id,
                    "name": call.name,
                    "arguments": call.arguments.to_string(),
                }));
            }
            for result in tool_results {
                messages.push(self.convert_mcp_tool_response_to_sdk_message(result, model));
            }
            return messages;
        }

        let calls: Vec<Value> = tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect();
        messages.push(json!({
            "role": "assistant",
            "content": assistant_text,
            "tool_calls": calls,
        }));
        for result in tool_results {
            messages.push(self.convert_mcp_tool_response_to_sdk_message(result, model));
        }
        messages
    }

    fn convert_mcp_tools_to_sdk_tools(&self, tools: &[McpTool]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                if self.uses_responses_api() {
                    json!({
                        "type": "function",
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    })
                } else {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        }
                    })
                }
            })
            .collect()
    }

    fn convert_sdk_tool_call_to_mcp(
        &self,
        call: &Value,
        _tools: &[McpTool],
    ) -> Option<McpToolCall> {
        parse_tool_call(call)
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
        if self.uses_responses_api() {
            json!({
                "type": "function_call_output",
                "call_id": result.call_id,
                "output": content,
            })
        } else {
            json!({
                "role": "tool",
                "tool_call_id": result.call_id,
                "content": content,
            })
        }
    }
}

fn parse_tool_call(call: &Value) -> Option<McpToolCall> {
    let id = call.get("id").or_else(|| call.get("call_id"))?.as_str()?;
    let function = call.get("function").unwrap_or(call);
    let name = function.get("name")?.as_str()?;
    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    };
    Some(McpToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    })
}

// ── chat-completions stream ─────────────────────────────────────────────

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Default)]
struct ChatCompletionsTransformer {
    tool_calls: Vec<PendingToolCall>,
    usage: Option<Usage>,
}

impl ResponseChunkTransformer for ChatCompletionsTransformer {
    fn on_chunk(&mut self, chunk: &Value, out: &mut Vec<GenericChunk>) {
        if let Some(usage) = chunk.get("usage")
            && !usage.is_null()
            && let Ok(usage) = serde_json::from_value::<Usage>(usage.clone())
        {
            self.usage = Some(usage);
        }

        let Some(delta) = chunk
            .pointer("/choices/0/delta")
            .filter(|d| !d.is_null())
        else {
            return;
        };

        // Some OpenAI-compatible servers stream reasoning under either key.
        for key in ["reasoning_content", "reasoning"] {
            if let Some(text) = delta.get(key).and_then(Value::as_str)
                && !text.is_empty()
            {
                out.push(GenericChunk::ThinkingDelta {
                    text: text.to_string(),
                    thinking_millsec: 0,
                });
            }
        }

        if let Some(text) = delta.get("content").and_then(Value::as_str)
            && !text.is_empty()
        {
            out.push(GenericChunk::text_delta(text));
        }

        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                while self.tool_calls.len() <= index {
                    self.tool_calls.push(PendingToolCall::default());
                }
                let pending = &mut self.tool_calls[index];
                if let Some(id) = call.get("id").and_then(Value::as_str) {
                    pending.id = id.to_string();
                }
                if let Some(name) = call.pointer("/function/name").and_then(Value::as_str) {
                    pending.name.push_str(name);
                }
                if let Some(arguments) =
                    call.pointer("/function/arguments").and_then(Value::as_str)
                {
                    pending.arguments.push_str(arguments);
                }
            }
        }
    }

    fn on_end(&mut self, out: &mut Vec<GenericChunk>) {
        let pending = std::mem::take(&mut self.tool_calls);
        let tool_calls: Vec<McpToolCall> = pending
            .into_iter()
            .filter(|call| !call.name.is_empty())
            .map(|call| McpToolCall {
                id: call.id,
                name: call.name,
                arguments: serde_json::from_str(&call.arguments).unwrap_or(Value::Null),
            })
            .collect();
        if !tool_calls.is_empty() {
            out.push(GenericChunk::McpToolCreated { tool_calls });
        }
        out.push(GenericChunk::LlmResponseComplete {
            usage: self.usage.take(),
            metrics: None,
        });
    }
}

// ── responses-API stream ────────────────────────────────────────────────

#[derive(Default)]
struct ResponsesTransformer {
    tool_calls: Vec<McpToolCall>,
    usage: Option<Usage>,
    completed: bool,
}

fn responses_usage(usage: &Value) -> Option<Usage> {
    let prompt = usage.get("input_tokens").and_then(Value::as_u64)?;
    let completion = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
    let total = usage
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(prompt + completion);
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
        thoughts_tokens: usage
            .pointer("/output_tokens_details/reasoning_tokens")
            .and_then(Value::as_u64),
        cost: None,
    })
}

impl ResponsesTransformer {
    fn flush(&mut self, out: &mut Vec<GenericChunk>) {
        if self.completed {
            return;
        }
        self.completed = true;
        let tool_calls = std::mem::take(&mut self.tool_calls);
        if !tool_calls.is_empty() {
            out.push(GenericChunk::McpToolCreated { tool_calls });
        }
        out.push(GenericChunk::LlmResponseComplete {
            usage: self.usage.take(),
            metrics: None,
        });
    }
}

impl ResponseChunkTransformer for ResponsesTransformer {
    fn on_chunk(&mut self, chunk: &Value, out: &mut Vec<GenericChunk>) {
        match chunk.get("type").and_then(Value::as_str).unwrap_or("") {
            "response.output_text.delta" | "response.refusal.delta" => {
                if let Some(delta) = chunk.get("delta").and_then(Value::as_str) {
                    out.push(GenericChunk::text_delta(delta));
                }
            }
            "response.reasoning_summary_text.delta" => {
                if let Some(delta) = chunk.get("delta").and_then(Value::as_str) {
                    out.push(GenericChunk::ThinkingDelta {
                        text: delta.to_string(),
                        thinking_millsec: 0,
                    });
                }
            }
            "response.web_search_call.in_progress" => {
                out.push(GenericChunk::LlmWebSearchInProgress);
            }
            "response.web_search_call.completed" => {
                out.push(GenericChunk::LlmWebSearchComplete {
                    results: WebSearchResults {
                        source: WebSearchSource::Provider,
                        results: chunk.clone(),
                    },
                });
            }
            "response.output_item.done" => {
                if chunk.pointer("/item/type").and_then(Value::as_str) == Some("function_call")
                    && let Some(item) = chunk.get("item")
                    && let Some(call) = parse_tool_call(item)
                {
                    self.tool_calls.push(call);
                }
            }
            "response.completed" => {
                if let Some(usage) = chunk.pointer("/response/usage") {
                    self.usage = responses_usage(usage);
                }
                self.flush(out);
            }
            "response.failed" | "error" => {
                let message = chunk
                    .pointer("/response/error/message")
                    .or_else(|| chunk.pointer("/error/message"))
                    .and_then(Value::as_str)
                    .unwrap_or("response failed");
                out.push(GenericChunk::Error {
                    error: ChunkError::new(message),
                });
                self.completed = true;
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

    use hearth_types::{
        Assistant, ChatMessage, GenericChunk, McpTool, ProviderConfig, ProviderKind,
        ReasoningEffort,
    };

    use super::OpenAiClient;
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

    fn client(kind: ProviderKind) -> OpenAiClient {
        OpenAiClient::new(
            ProviderConfig {
                id: "p1".into(),
                kind,
                api_key: "key".into(),
                base_url: None,
                api_version: None,
            },
            Arc::new(NullTransport),
        )
    }

    fn request() -> CompletionsRequest {
        CompletionsRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: Vec::new(),
        }
    }

    #[test]
    fn chat_payload_carries_system_prompt_and_flags() {
        let client = client(ProviderKind::OpenAi);
        let mut assistant = Assistant::new("a1", "A");
        assistant.prompt = Some("be brief".into());
        assistant.temperature = Some(0.3);
        assistant.reasoning_effort = Some(ReasoningEffort::High);
        let mut model = hearth_types::Model::named("gpt-4o");
        model.supports_reasoning = false;

        let out = client
            .transform_request(&request(), &assistant, &model, false, None)
            .unwrap();
        assert_eq!(out.payload["messages"][0]["role"], "system");
        assert_eq!(out.payload["messages"][1]["content"], "hi");
        assert!((out.payload["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        // Model does not support reasoning: no effort field.
        assert!(out.payload.get("reasoning_effort").is_none());
        assert_eq!(out.payload["stream"], true);
    }

    #[test]
    fn reasoning_models_drop_temperature_and_gain_effort() {
        let client = client(ProviderKind::OpenAi);
        let mut assistant = Assistant::new("a1", "A");
        assistant.temperature = Some(0.9);
        assistant.reasoning_effort = Some(ReasoningEffort::Low);
        let mut model = hearth_types::Model::named("o3-mini");
        model.supports_reasoning = true;

        let out = client
            .transform_request(&request(), &assistant, &model, false, None)
            .unwrap();
        assert!(out.payload.get("temperature").is_none());
        assert_eq!(out.payload["reasoning_effort"], "low");
    }

    #[test]
    fn recursive_call_uses_prebuilt_messages() {
        let client = client(ProviderKind::OpenAi);
        let assistant = Assistant::new("a1", "A");
        let model = hearth_types::Model::named("gpt-4o");
        let prebuilt = vec![json!({"role": "tool", "tool_call_id": "t1", "content": "res"})];

        let out = client
            .transform_request(&request(), &assistant, &model, true, Some(&prebuilt))
            .unwrap();
        assert_eq!(out.payload["messages"], json!(prebuilt));
    }

    #[test]
    fn tools_are_wrapped_in_function_envelopes() {
        let client = client(ProviderKind::OpenAi);
        let assistant = Assistant::new("a1", "A");
        let model = hearth_types::Model::named("gpt-4o");
        let mut request = request();
        request.tools = vec![McpTool {
            id: "t".into(),
            name: "search".into(),
            description: "find things".into(),
            input_schema: json!({"type": "object"}),
            server_name: None,
        }];

        let out = client
            .transform_request(&request, &assistant, &model, false, None)
            .unwrap();
        assert_eq!(out.payload["tools"][0]["function"]["name"], "search");
    }

    #[test]
    fn azure_endpoint_embeds_deployment_and_api_version() {
        let mut client = client(ProviderKind::AzureOpenAi);
        client.config.base_url = Some("https://example.openai.azure.com".into());
        let url = client.endpoint(&json!({"model": "gpt-4o-deploy"}));
        assert_eq!(
            url,
            "https://example.openai.azure.com/openai/deployments/gpt-4o-deploy/chat/completions?api-version=2024-10-21"
        );
        assert_eq!(client.headers()[0].0, "api-key");
    }

    #[test]
    fn chat_stream_accumulates_tool_calls_and_usage() {
        let client = client(ProviderKind::OpenAi);
        let mut transformer = client.response_chunk_transformer();
        let mut out = Vec::new();

        transformer.on_chunk(
            &json!({"choices": [{"delta": {"content": "Hello"}}]}),
            &mut out,
        );
        transformer.on_chunk(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "sea"}}
            ]}}]}),
            &mut out,
        );
        transformer.on_chunk(
            &json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"name": "rch", "arguments": "{\"q\":\"x\"}"}}
            ]}}]}),
            &mut out,
        );
        transformer.on_chunk(
            &json!({"choices": [], "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}}),
            &mut out,
        );
        transformer.on_end(&mut out);

        assert!(matches!(&out[0], GenericChunk::TextDelta { text } if text == "Hello"));
        let GenericChunk::McpToolCreated { tool_calls } = &out[1] else {
            panic!("expected tool chunk, got {out:?}");
        };
        assert_eq!(tool_calls[0].name, "search");
        assert_eq!(tool_calls[0].arguments["q"], "x");
        let GenericChunk::LlmResponseComplete { usage, .. } = &out[2] else {
            panic!("expected completion chunk");
        };
        assert_eq!(usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn responses_stream_maps_events() {
        let client = client(ProviderKind::OpenAiResponses);
        let mut transformer = client.response_chunk_transformer();
        let mut out = Vec::new();

        transformer.on_chunk(
            &json!({"type": "response.output_text.delta", "delta": "ok"}),
            &mut out,
        );
        transformer.on_chunk(
            &json!({"type": "response.completed", "response": {"usage": {
                "input_tokens": 3, "output_tokens": 1, "total_tokens": 4
            }}}),
            &mut out,
        );
        transformer.on_end(&mut out);

        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0], GenericChunk::TextDelta { text } if text == "ok"));
        let GenericChunk::LlmResponseComplete { usage, .. } = &out[1] else {
            panic!("expected completion chunk");
        };
        assert_eq!(usage.unwrap().prompt_tokens, 3);
    }
}
