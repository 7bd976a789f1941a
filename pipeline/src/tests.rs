//! Whole-pipeline flows: scripted vendor rounds through the full default
//! chain, observed at `on_chunk`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use hearth_types::{
    ChunkError, GenericChunk, McpTool, McpToolCall, McpToolResult, Usage,
};

use crate::context::{AbortSignal, CompletionsParams, ToolExecutor};
use crate::middleware::complete;
use crate::testing::{MockClient, MockEvent, basic_params};

fn collector() -> (Arc<Mutex<Vec<GenericChunk>>>, crate::context::ChunkHandler) {
    let seen: Arc<Mutex<Vec<GenericChunk>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: crate::context::ChunkHandler =
        Arc::new(move |chunk| sink.lock().unwrap().push(chunk));
    (seen, handler)
}

fn tags(seen: &[GenericChunk]) -> Vec<&'static str> {
    seen.iter().map(GenericChunk::tag).collect()
}

fn count_tag(seen: &[GenericChunk], tag: &str) -> usize {
    seen.iter().filter(|c| c.tag() == tag).count()
}

struct EchoTool;

#[async_trait]
impl ToolExecutor for EchoTool {
    async fn execute(&self, call: &McpToolCall) -> McpToolResult {
        McpToolResult::success(call, json!("res"))
    }
}

fn search_tool() -> McpTool {
    McpTool {
        id: "search".into(),
        name: "search".into(),
        description: "find".into(),
        input_schema: json!({"type": "object"}),
        server_name: None,
    }
}

fn usage(total: u64) -> Usage {
    Usage {
        prompt_tokens: total / 2,
        completion_tokens: total - total / 2,
        total_tokens: total,
        thoughts_tokens: None,
        cost: None,
    }
}

fn with_tools(mut params: CompletionsParams) -> CompletionsParams {
    params.request.tools = vec![search_tool()];
    params.tool_executor = Some(Arc::new(EchoTool));
    params
}

#[tokio::test(flavor = "multi_thread")]
async fn plain_text_round_emits_one_of_everything() {
    let client = Arc::new(MockClient::scripted(vec![vec![
        GenericChunk::text_delta("hello"),
        GenericChunk::LlmResponseComplete {
            usage: Some(usage(10)),
            metrics: None,
        },
    ]]));
    let (seen, handler) = collector();
    let mut params = basic_params();
    params.on_chunk = Some(handler);

    let summary = complete(client.clone(), params).await.unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(
        tags(&seen),
        vec![
            "llm_response_created",
            "text_delta",
            "llm_response_complete",
            "block_complete"
        ]
    );
    assert_eq!(summary.usage.unwrap().total_tokens, 10);
    assert_eq!(client.call_count(), 1);
}

/// S5: one tool round, then a recursive completion. The caller observes a
/// single created/complete pair, no `mcp_tool_created`, and exactly one
/// `block_complete` carrying accumulated usage.
#[tokio::test(flavor = "multi_thread")]
async fn tool_loop_round_trip() {
    let client = Arc::new(MockClient::scripted(vec![
        vec![
            GenericChunk::McpToolCreated {
                tool_calls: vec![McpToolCall {
                    id: "call_1".into(),
                    name: "search".into(),
                    arguments: json!({"q": "x"}),
                }],
            },
            GenericChunk::LlmResponseComplete {
                usage: Some(usage(100)),
                metrics: None,
            },
        ],
        vec![
            GenericChunk::text_delta("ok"),
            GenericChunk::LlmResponseComplete {
                usage: Some(usage(40)),
                metrics: None,
            },
        ],
    ]));
    let (seen, handler) = collector();
    let mut params = with_tools(basic_params());
    params.on_chunk = Some(handler);

    let summary = complete(client.clone(), params).await.unwrap();
    let seen = seen.lock().unwrap();

    assert_eq!(count_tag(&seen, "llm_response_created"), 1);
    assert_eq!(count_tag(&seen, "mcp_tool_created"), 0);
    assert_eq!(count_tag(&seen, "llm_response_complete"), 1);
    assert_eq!(count_tag(&seen, "block_complete"), 1);
    assert!(seen.iter().any(
        |c| matches!(c, GenericChunk::TextDelta { text } if text == "ok")
    ));

    // Both rounds' usage accumulated into the one block_complete.
    let GenericChunk::BlockComplete {
        response: Some(summary_chunk),
    } = seen.last().unwrap()
    else {
        panic!("expected block_complete last, got {seen:?}");
    };
    assert_eq!(summary_chunk.usage.unwrap().total_tokens, 140);
    assert_eq!(summary.usage.unwrap().total_tokens, 140);

    // One top-level call plus one recursive round.
    assert_eq!(client.call_count(), 2);
}

/// Tools can also arrive as prompt-style `<tool_use>` spans in the text;
/// the loop must run them even though no `mcp_tool_created` chunk ever
/// appeared.
#[tokio::test(flavor = "multi_thread")]
async fn prompt_style_tool_use_triggers_the_loop() {
    let span = r#"<tool_use>{"name": "search", "arguments": {"q": "x"}}</tool_use>"#;
    let client = Arc::new(MockClient::scripted(vec![
        vec![
            GenericChunk::text_delta(format!("Checking. {span}")),
            GenericChunk::LlmResponseComplete {
                usage: Some(usage(30)),
                metrics: None,
            },
        ],
        vec![
            GenericChunk::text_delta("found it"),
            GenericChunk::LlmResponseComplete {
                usage: Some(usage(12)),
                metrics: None,
            },
        ],
    ]));
    let (seen, handler) = collector();
    let mut params = with_tools(basic_params());
    params.on_chunk = Some(handler);

    complete(client.clone(), params).await.unwrap();
    let seen = seen.lock().unwrap();

    // The text round recursed: two SDK calls, one merged stream.
    assert_eq!(client.call_count(), 2);
    assert_eq!(count_tag(&seen, "mcp_tool_created"), 0);
    assert_eq!(count_tag(&seen, "llm_response_complete"), 1);
    assert_eq!(count_tag(&seen, "block_complete"), 1);
    assert!(seen.iter().any(
        |c| matches!(c, GenericChunk::TextDelta { text } if text == "found it")
    ));
    // Both rounds' usage accumulated.
    let GenericChunk::BlockComplete {
        response: Some(summary),
    } = seen.last().unwrap()
    else {
        panic!("expected block_complete last");
    };
    assert_eq!(summary.usage.unwrap().total_tokens, 42);
}

/// S6: thinking then text, with wall-clock separation between the deltas.
#[tokio::test(flavor = "multi_thread")]
async fn thinking_then_text_flow() {
    let client = Arc::new(MockClient::new(vec![vec![
        MockEvent::new(GenericChunk::ThinkingDelta {
            text: "step1".into(),
            thinking_millsec: 0,
        }),
        MockEvent::after(
            GenericChunk::ThinkingDelta {
                text: "step2".into(),
                thinking_millsec: 0,
            },
            Duration::from_millis(50),
        ),
        MockEvent::new(GenericChunk::text_delta("answer")),
        MockEvent::new(GenericChunk::LlmResponseComplete {
            usage: None,
            metrics: None,
        }),
    ]]));
    let (seen, handler) = collector();
    let mut params = basic_params();
    params.assistant.thinking_budget = Some(1024);
    params.model.supports_reasoning = true;
    params.on_chunk = Some(handler);

    complete(client, params).await.unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(
        tags(&seen),
        vec![
            "llm_response_created",
            "thinking_delta",
            "thinking_delta",
            "thinking_complete",
            "text_delta",
            "llm_response_complete",
            "block_complete"
        ]
    );

    let GenericChunk::ThinkingComplete {
        text,
        thinking_millsec,
    } = &seen[3]
    else {
        panic!("expected thinking_complete");
    };
    assert_eq!(text, "step1step2");
    assert!(*thinking_millsec >= 40, "expected ≈50ms, got {thinking_millsec}");

    // Per-delta times never decrease.
    let times: Vec<u64> = seen
        .iter()
        .filter_map(|c| match c {
            GenericChunk::ThinkingDelta {
                thinking_millsec, ..
            } => Some(*thinking_millsec),
            _ => None,
        })
        .collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test(flavor = "multi_thread")]
async fn recursion_depth_limit_stops_sdk_calls() {
    let tool_round = || {
        vec![
            GenericChunk::McpToolCreated {
                tool_calls: vec![McpToolCall {
                    id: "c".into(),
                    name: "search".into(),
                    arguments: json!({}),
                }],
            },
            GenericChunk::LlmResponseComplete {
                usage: None,
                metrics: None,
            },
        ]
    };
    // Far more rounds than the limit allows; the depth guard must stop
    // the loop long before the script runs dry.
    let client = Arc::new(MockClient::scripted(
        (0..40).map(|_| tool_round()).collect(),
    ));
    let (seen, handler) = collector();
    let mut params = with_tools(basic_params());
    params.on_chunk = Some(handler);

    complete(client.clone(), params).await.unwrap();
    let seen = seen.lock().unwrap();

    let recursion_error = seen.iter().any(|c| {
        matches!(
            c,
            GenericChunk::Error { error: ChunkError { code: Some(code), .. } }
                if code == "tool_recursion_exceeded"
        )
    });
    assert!(recursion_error, "expected recursion error, got {seen:?}");
    // Levels 0..=20 each made one SDK call; level 20 errored instead of
    // recursing further.
    assert_eq!(client.call_count(), 21);
    assert_eq!(count_tag(&seen, "block_complete"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_surfaces_as_pause_placeholder() {
    let client = Arc::new(MockClient::scripted(vec![vec![GenericChunk::text_delta(
        "never seen",
    )]]));
    let (seen, handler) = collector();
    let mut params = basic_params();
    params.on_chunk = Some(handler);
    let signal = AbortSignal::new();
    signal.abort();
    params.abort = Some(signal);

    complete(client, params).await.unwrap();
    let seen = seen.lock().unwrap();
    assert!(seen.iter().any(|c| matches!(
        c,
        GenericChunk::Error { error } if error.is_abort()
    )));
}

#[tokio::test(flavor = "multi_thread")]
async fn sdk_failure_reaches_on_chunk_as_error() {
    // No rounds scripted: the first create_completions fails.
    let client = Arc::new(MockClient::scripted(Vec::new()));
    let (seen, handler) = collector();
    let mut params = basic_params();
    params.on_chunk = Some(handler);

    let result = complete(client, params).await;
    assert!(result.is_ok(), "errors terminate the stream, not the call");
    let seen = seen.lock().unwrap();
    assert!(seen.iter().any(|c| matches!(
        c,
        GenericChunk::Error { error } if error.message.contains("mock rounds exhausted")
    )));
}

#[tokio::test(flavor = "multi_thread")]
async fn throw_on_error_rethrows() {
    let client = Arc::new(MockClient::scripted(Vec::new()));
    let mut params = basic_params();
    params.throw_on_error = true;
    let result = complete(client, params).await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn resolved_arguments_override_model_arguments() {
    struct Resolver {
        seen_args: Arc<Mutex<Option<Value>>>,
    }

    #[async_trait]
    impl ToolExecutor for Resolver {
        async fn execute(&self, call: &McpToolCall) -> McpToolResult {
            *self.seen_args.lock().unwrap() = Some(call.arguments.clone());
            McpToolResult::success(call, json!("res"))
        }

        fn resolved_arguments(&self, _call: &McpToolCall) -> Option<Value> {
            Some(json!({"q": "user-approved"}))
        }
    }

    let client = Arc::new(MockClient::scripted(vec![
        vec![
            GenericChunk::McpToolCreated {
                tool_calls: vec![McpToolCall {
                    id: "c1".into(),
                    name: "search".into(),
                    arguments: json!({"q": "model", "limit": 3}),
                }],
            },
            GenericChunk::LlmResponseComplete {
                usage: None,
                metrics: None,
            },
        ],
        vec![
            GenericChunk::text_delta("done"),
            GenericChunk::LlmResponseComplete {
                usage: None,
                metrics: None,
            },
        ],
    ]));

    let seen_args = Arc::new(Mutex::new(None));
    let mut params = basic_params();
    params.request.tools = vec![search_tool()];
    params.tool_executor = Some(Arc::new(Resolver {
        seen_args: Arc::clone(&seen_args),
    }));

    complete(client, params).await.unwrap();
    let args = seen_args.lock().unwrap().clone().unwrap();
    assert_eq!(args["q"], "user-approved");
    assert_eq!(args["limit"], 3);
}
