//! The recursive tool-call loop.
//!
//! Intercepts `mcp_tool_created` chunks (they never reach the consumer),
//! executes the collected calls against the injected executor, and feeds
//! the results back through the whole composed chain as a recursive
//! completion. The recursive invocation's chunks are inlined into this
//! level's output stream at the point the interception flushes.

use std::sync::Arc;

use futures_util::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use hearth_types::{GenericChunk, McpTool, McpToolCall, McpToolResult};

use crate::context::{CompletionsContext, CompletionsFn, CompletionsParams};
use crate::error::{MAX_TOOL_RECURSION_DEPTH, PipelineError};
use crate::middleware::{Middleware, StageOutput};
use crate::stream::{ChunkStream, channel_stream};

pub struct McpToolChunkMiddleware;

impl Middleware for McpToolChunkMiddleware {
    fn name(&self) -> &'static str {
        "McpToolChunkMiddleware"
    }

    fn wrap(self: Arc<Self>, next: CompletionsFn) -> CompletionsFn {
        Arc::new(move |ctx, params| {
            let next = Arc::clone(&next);
            async move {
                match next(ctx.clone(), params.clone()).await? {
                    StageOutput::Chunks(stream) => {
                        let (tx, out_stream) = channel_stream();
                        tokio::spawn(run_tool_loop(ctx, params, stream, tx));
                        Ok(StageOutput::Chunks(out_stream))
                    }
                    other => Ok(other),
                }
            }
            .boxed()
        })
    }
}

const TOOL_USE_OPEN: &str = "<tool_use>";
const TOOL_USE_CLOSE: &str = "</tool_use>";

/// Prompt-style tool extraction.
///
/// Models without native tool calling are prompted to answer with
/// `<tool_use>{"name": …, "arguments": …}</tool_use>` spans in their text;
/// the whole round's text is inspected at flush. Only names advertised in
/// `tools` are accepted, so a hallucinated tool cannot trigger a round.
fn extract_tool_uses_from_text(text: &str, tools: &[McpTool]) -> Vec<McpToolCall> {
    let mut calls = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find(TOOL_USE_OPEN) {
        let after_open = &rest[open + TOOL_USE_OPEN.len()..];
        let Some(close) = after_open.find(TOOL_USE_CLOSE) else {
            break;
        };
        let body = after_open[..close].trim();
        rest = &after_open[close + TOOL_USE_CLOSE.len()..];

        let Ok(parsed) = serde_json::from_str::<Value>(body) else {
            tracing::debug!("Ignoring unparseable tool_use span");
            continue;
        };
        let Some(name) = parsed.get("name").and_then(Value::as_str) else {
            continue;
        };
        if !tools.iter().any(|tool| tool.name == name) {
            tracing::warn!("Model referenced unknown tool {name} in text");
            continue;
        }
        calls.push(McpToolCall {
            id: format!("text-{}", Uuid::new_v4()),
            name: name.to_string(),
            arguments: parsed
                .get("arguments")
                .or_else(|| parsed.get("args"))
                .cloned()
                .unwrap_or(Value::Null),
        });
    }
    calls
}

/// Resolved argument overrides win over the model's arguments; for object
/// pairs the merge is per key.
fn merge_arguments(original: &Value, resolved: &Value) -> Value {
    match (original, resolved) {
        (Value::Object(base), Value::Object(overrides)) => {
            let mut merged = base.clone();
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => resolved.clone(),
    }
}

async fn send(tx: &mpsc::Sender<GenericChunk>, chunk: GenericChunk) -> bool {
    tx.send(chunk).await.is_ok()
}

async fn run_tool_loop(
    ctx: CompletionsContext,
    params: CompletionsParams,
    mut stream: ChunkStream,
    tx: mpsc::Sender<GenericChunk>,
) {
    let mut collected: Vec<McpToolCall> = Vec::new();
    let mut assistant_text = String::new();
    let mut withheld_complete: Option<GenericChunk> = None;

    while let Some(chunk) = stream.next().await {
        match chunk {
            GenericChunk::McpToolCreated { tool_calls } => {
                // Intercepted: the side-effect is a recursive call, the
                // chunk itself is never forwarded.
                collected.extend(tool_calls);
            }
            GenericChunk::TextDelta { ref text } => {
                // Kept for the next round's assistant message (and for
                // prompt-style tool extraction, which arrives as text).
                assistant_text.push_str(text);
                if !send(&tx, chunk).await {
                    return;
                }
            }
            chunk @ GenericChunk::LlmResponseComplete { .. } => {
                // Held back: if this round requested tools, the response
                // is not actually complete yet.
                withheld_complete = Some(chunk);
            }
            other => {
                if !send(&tx, other).await {
                    return;
                }
            }
        }
    }

    // The round runs tools when structured calls were collected OR the
    // accumulated text carries prompt-style tool uses.
    if collected.is_empty() {
        collected = extract_tool_uses_from_text(&assistant_text, &params.request.tools);
    }
    if collected.is_empty() {
        if let Some(complete) = withheld_complete {
            send(&tx, complete).await;
        }
        return;
    }

    if ctx.recursion.depth >= MAX_TOOL_RECURSION_DEPTH {
        let error = PipelineError::ToolRecursionExceeded {
            depth: ctx.recursion.depth,
        };
        tracing::error!("{error}");
        send(&tx, GenericChunk::Error { error: error.to_chunk_error() }).await;
        return;
    }

    // The withheld round's usage still counts toward the call totals.
    if let Some(GenericChunk::LlmResponseComplete { usage, metrics }) = &withheld_complete {
        let mut shared = ctx.shared();
        if let Some(usage) = usage {
            shared.accumulate_usage(usage);
        }
        if let Some(metrics) = metrics {
            shared.accumulate_metrics(metrics);
        }
    }

    let mut results: Vec<McpToolResult> = Vec::with_capacity(collected.len());
    for call in &mut collected {
        let result = match &params.tool_executor {
            Some(executor) => {
                if let Some(resolved) = executor.resolved_arguments(call) {
                    call.arguments = merge_arguments(&call.arguments, &resolved);
                }
                // Announce the pending execution, then the outcome.
                send(
                    &tx,
                    GenericChunk::McpToolInProgress {
                        responses: vec![McpToolResult {
                            call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            is_error: false,
                            content: Value::Null,
                        }],
                    },
                )
                .await;
                executor.execute(call).await
            }
            None => McpToolResult::error(call, "no tool executor configured"),
        };
        send(
            &tx,
            GenericChunk::McpToolInProgress {
                responses: vec![result.clone()],
            },
        )
        .await;
        results.push(result);
    }

    // Build the next round from this round's processed messages plus the
    // assistant output and tool results.
    let (current_messages, snapshot) = {
        let level = ctx.level();
        (level.processed_messages.clone(), level.assistant_snapshot.clone())
    };
    let assistant_text = snapshot.unwrap_or(assistant_text);
    let next_messages = ctx.client.build_sdk_messages(
        &current_messages,
        &assistant_text,
        &collected,
        &results,
        &params.model,
    );

    let Some(enhanced) = ctx.enhanced_completions() else {
        send(
            &tx,
            GenericChunk::error("tool loop cannot recurse: composed chain unavailable"),
        )
        .await;
        return;
    };

    let child_ctx = ctx.child_for_recursion();
    let mut child_params = params.clone();
    child_params.prebuilt_messages = Some(next_messages);

    match enhanced(child_ctx, child_params).await {
        Ok(StageOutput::Chunks(mut recursive)) => {
            while let Some(chunk) = recursive.next().await {
                if !send(&tx, chunk).await {
                    return;
                }
            }
        }
        Ok(other) => {
            tracing::warn!("Recursive completion returned {other:?}; nothing to inline");
        }
        Err(e) => {
            send(&tx, GenericChunk::Error { error: e.to_chunk_error() }).await;
        }
    }
}
