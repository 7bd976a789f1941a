//! Gemini client.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use hearth_types::{
    Assistant, GenericChunk, McpTool, McpToolCall, McpToolResult, Model, ProviderKind, Role,
    Usage, WebSearchResults, WebSearchSource,
};

use crate::client::{
    ApiClient, CompletionsRequest, ResponseChunkTransformer, TransformedRequest,
    truncate_to_context,
};
use crate::error::SdkError;
use crate::transport::{RawSdkOutput, SdkRequest, SdkTransport};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClient {
    config: hearth_types::ProviderConfig,
    transport: Arc<dyn SdkTransport>,
}

impl GeminiClient {
    #[must_use]
    pub fn new(config: hearth_types::ProviderConfig, transport: Arc<dyn SdkTransport>) -> Self {
        Self { config, transport }
    }

    fn endpoint(&self, payload: &Value) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let model = payload
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default();
        format!("{base}/models/{model}:streamGenerateContent?alt=sse")
    }
}

#[async_trait]
impl ApiClient for GeminiClient {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn transform_request(
        &self,
        request: &CompletionsRequest,
        assistant: &Assistant,
        model: &Model,
        is_recursive: bool,
        prebuilt_messages: Option<&[Value]>,
    ) -> Result<TransformedRequest, SdkError> {
        let contents = match (is_recursive, prebuilt_messages) {
            (true, Some(prebuilt)) => prebuilt.to_vec(),
            _ => truncate_to_context(&request.messages, assistant)
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| {
                    json!({
                        "role": if m.role == Role::User { "user" } else { "model" },
                        "parts": [{"text": m.content}],
                    })
                })
                .collect(),
        };

        let mut body = Map::new();
        // The model travels in the payload so the endpoint builder can
        // address the right resource; it is not part of the wire body.
        body.insert("model".into(), json!(model.id));
        body.insert("contents".into(), Value::Array(contents.clone()));

        if let Some(prompt) = assistant.prompt.as_deref()
            && !prompt.trim().is_empty()
        {
            body.insert(
                "systemInstruction".into(),
                json!({"parts": [{"text": prompt}]}),
            );
        }

        let mut generation = Map::new();
        if let Some(temperature) = assistant.temperature
            && model.accepts_temperature()
        {
            generation.insert("temperature".into(), json!(temperature));
        }
        if let Some(budget) = assistant.thinking_budget
            && model.supports_reasoning
        {
            generation.insert(
                "thinkingConfig".into(),
                json!({"thinkingBudget": budget, "includeThoughts": true}),
            );
        }
        if !generation.is_empty() {
            body.insert("generationConfig".into(), Value::Object(generation));
        }

        let mut tools: Vec<Value> = Vec::new();
        let declarations = self.convert_mcp_tools_to_sdk_tools(&request.tools);
        if !declarations.is_empty() {
            tools.push(json!({"functionDeclarations": declarations}));
        }
        if assistant.enable_web_search && model.supports_web_search {
            tools.push(json!({"googleSearch": {}}));
        }
        if !tools.is_empty() {
            body.insert("tools".into(), Value::Array(tools));
        }

        Ok(TransformedRequest {
            payload: Value::Object(body),
            messages: contents,
            metadata: None,
        })
    }

    fn response_chunk_transformer(&self) -> Box<dyn ResponseChunkTransformer> {
        Box::new(GeminiTransformer::default())
    }

    async fn create_completions(&self, payload: &Value) -> Result<RawSdkOutput, SdkError> {
        let url = self.endpoint(payload);
        let mut body = payload.clone();
        if let Some(map) = body.as_object_mut() {
            map.remove("model");
        }
        let request = SdkRequest {
            url,
            headers: vec![("x-goog-api-key", self.config.api_key.clone())],
            body,
            stream: true,
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

        let mut parts: Vec<Value> = Vec::new();
        if !assistant_text.is_empty() {
            parts.push(json!({"text": assistant_text}));
        }
        for call in tool_calls {
            parts.push(json!({
                "functionCall": {"name": call.name, "args": call.arguments}
            }));
        }
        messages.push(json!({"role": "model", "parts": parts}));

        let response_parts: Vec<Value> = tool_results
            .iter()
            .map(|result| self.convert_mcp_tool_response_to_sdk_message(result, model))
            .collect();
        messages.push(json!({"role": "user", "parts": response_parts}));
        messages
    }

    fn convert_mcp_tools_to_sdk_tools(&self, tools: &[McpTool]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                })
            })
            .collect()
    }

    fn convert_sdk_tool_call_to_mcp(
        &self,
        call: &Value,
        tools: &[McpTool],
    ) -> Option<McpToolCall> {
        let name = call.get("name")?.as_str()?.to_string();
        // Gemini calls carry no id; mint one stable enough for the round.
        let id = format!("{name}-{}", tools.len());
        Some(McpToolCall {
            id,
            name,
            arguments: call.get("args").cloned().unwrap_or(Value::Null),
        })
    }

    fn convert_mcp_tool_response_to_sdk_message(
        &self,
        result: &McpToolResult,
        _model: &Model,
    ) -> Value {
        json!({
            "functionResponse": {
                "name": result.tool_name,
                "response": {"result": result.content},
            }
        })
    }
}

// ── streaming ───────────────────────────────────────────────────────────

#[derive(Default)]
struct GeminiTransformer {
    tool_calls: Vec<McpToolCall>,
    tool_seq: u32,
    usage: Option<Usage>,
    finished: bool,
}

fn gemini_usage(metadata: &Value) -> Option<Usage> {
    let prompt = metadata.get("promptTokenCount").and_then(Value::as_u64)?;
    let completion = metadata
        .get("candidatesTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: metadata
            .get("totalTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(prompt + completion),
        thoughts_tokens: metadata.get("thoughtsTokenCount").and_then(Value::as_u64),
        cost: None,
    })
}

impl GeminiTransformer {
    fn flush(&mut self, out: &mut Vec<GenericChunk>) {
        if self.finished {
            return;
        }
        self.finished = true;
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

impl ResponseChunkTransformer for GeminiTransformer {
    fn on_chunk(&mut self, chunk: &Value, out: &mut Vec<GenericChunk>) {
        if let Some(metadata) = chunk.get("usageMetadata") {
            if let Some(usage) = gemini_usage(metadata) {
                self.usage = Some(usage);
            }
        }

        if let Some(parts) = chunk
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                        out.push(GenericChunk::ThinkingDelta {
                            text: text.to_string(),
                            thinking_millsec: 0,
                        });
                    } else if !text.is_empty() {
                        out.push(GenericChunk::text_delta(text));
                    }
                }
                if let Some(call) = part.get("functionCall") {
                    let name = call
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    self.tool_seq += 1;
                    self.tool_calls.push(McpToolCall {
                        id: format!("{name}-{}", self.tool_seq),
                        name,
                        arguments: call.get("args").cloned().unwrap_or(Value::Null),
                    });
                }
            }
        }

        if let Some(grounding) = chunk.pointer("/candidates/0/groundingMetadata") {
            out.push(GenericChunk::LlmWebSearchComplete {
                results: WebSearchResults {
                    source: WebSearchSource::Provider,
                    results: grounding.clone(),
                },
            });
        }

        if chunk
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
            .is_some()
        {
            self.flush(out);
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

    use super::GeminiClient;
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

    fn client() -> GeminiClient {
        GeminiClient::new(
            ProviderConfig {
                id: "p1".into(),
                kind: ProviderKind::Gemini,
                api_key: "key".into(),
                base_url: None,
                api_version: None,
            },
            Arc::new(NullTransport),
        )
    }

    #[test]
    fn request_maps_roles_and_system_instruction() {
        let client = client();
        let mut assistant = Assistant::new("a1", "A");
        assistant.prompt = Some("stay calm".into());
        let model = hearth_types::Model::named("gemini-2.0-flash");
        let request = CompletionsRequest {
            messages: vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")],
            tools: Vec::new(),
        };

        let out = client
            .transform_request(&request, &assistant, &model, false, None)
            .unwrap();
        assert_eq!(out.payload["contents"][0]["role"], "user");
        assert_eq!(out.payload["contents"][1]["role"], "model");
        assert_eq!(
            out.payload["systemInstruction"]["parts"][0]["text"],
            "stay calm"
        );
    }

    #[test]
    fn endpoint_addresses_model_resource() {
        let client = client();
        let url = client.endpoint(&json!({"model": "gemini-2.0-flash"}));
        assert!(url.ends_with("/models/gemini-2.0-flash:streamGenerateContent?alt=sse"));
    }

    #[test]
    fn stream_separates_thoughts_from_text() {
        let client = client();
        let mut transformer = client.response_chunk_transformer();
        let mut out = Vec::new();

        transformer.on_chunk(
            &json!({"candidates": [{"content": {"parts": [
                {"text": "pondering", "thought": true},
                {"text": "answer"}
            ]}}]}),
            &mut out,
        );
        transformer.on_chunk(
            &json!({
                "candidates": [{"content": {"parts": []}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}
            }),
            &mut out,
        );
        transformer.on_end(&mut out);

        assert!(matches!(&out[0], GenericChunk::ThinkingDelta { text, .. } if text == "pondering"));
        assert!(matches!(&out[1], GenericChunk::TextDelta { text } if text == "answer"));
        let GenericChunk::LlmResponseComplete { usage, .. } = &out[2] else {
            panic!("expected completion chunk, got {out:?}");
        };
        assert_eq!(usage.unwrap().total_tokens, 6);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn function_calls_become_tool_chunks() {
        let client = client();
        let mut transformer = client.response_chunk_transformer();
        let mut out = Vec::new();

        transformer.on_chunk(
            &json!({"candidates": [{"content": {"parts": [
                {"functionCall": {"name": "search", "args": {"q": "x"}}}
            ]}, "finishReason": "STOP"}]}),
            &mut out,
        );

        let GenericChunk::McpToolCreated { tool_calls } = &out[0] else {
            panic!("expected tool chunk, got {out:?}");
        };
        assert_eq!(tool_calls[0].name, "search");
        assert_eq!(tool_calls[0].arguments["q"], "x");
    }
}
