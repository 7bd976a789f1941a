//! Per-invocation completions context and parameters.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;

use hearth_providers::{ApiClient, CompletionsRequest};
use hearth_types::{
    Assistant, CompletionsSummary, GenericChunk, McpToolCall, McpToolResult, Metrics, Model,
    Usage,
};

use crate::error::PipelineError;
use crate::middleware::StageOutput;

/// Callback receiving every generic chunk of a completion call.
pub type ChunkHandler = Arc<dyn Fn(GenericChunk) + Send + Sync>;

/// The composed middleware chain as a callable; stored in the context so
/// the tool loop can re-enter it recursively.
pub type CompletionsFn = Arc<
    dyn Fn(CompletionsContext, CompletionsParams) -> BoxFuture<'static, Result<StageOutput, PipelineError>>
        + Send
        + Sync,
>;

/// Cooperative cancellation signal propagated to the SDK call and the
/// consumer loop.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

#[derive(Default)]
struct AbortInner {
    aborted: std::sync::atomic::AtomicBool,
    notify: tokio::sync::Notify,
}

impl AbortSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.inner
            .aborted
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Resolves once the signal fires (immediately if it already has).
    pub async fn aborted(&self) {
        if self.is_aborted() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_aborted() {
            return;
        }
        notified.await;
    }
}

/// Executes tool calls against the MCP registry; provided by the host.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &McpToolCall) -> McpToolResult;

    /// Permission-resolved argument overrides (user-edited values). Merged
    /// over the model's arguments before execution, overrides winning.
    fn resolved_arguments(&self, _call: &McpToolCall) -> Option<Value> {
        None
    }
}

/// Parameters of one user-facing completion call.
#[derive(Clone)]
pub struct CompletionsParams {
    pub assistant: Assistant,
    pub model: Model,
    pub request: CompletionsRequest,
    pub on_chunk: Option<ChunkHandler>,
    pub abort: Option<AbortSignal>,
    pub tool_executor: Option<Arc<dyn ToolExecutor>>,
    /// Vendor-shaped messages substituted on recursive tool rounds.
    pub prebuilt_messages: Option<Vec<Value>>,
    /// Re-throw errors to the caller instead of terminating the stream
    /// with an error chunk.
    pub throw_on_error: bool,
}

impl CompletionsParams {
    #[must_use]
    pub fn new(assistant: Assistant, model: Model, request: CompletionsRequest) -> Self {
        Self {
            assistant,
            model,
            request,
            on_chunk: None,
            abort: None,
            tool_executor: None,
            prebuilt_messages: None,
            throw_on_error: false,
        }
    }

    pub fn emit(&self, chunk: GenericChunk) {
        if let Some(handler) = &self.on_chunk {
            handler(chunk);
        }
    }
}

/// Recursion bookkeeping, copied per level.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecursionState {
    pub is_recursive: bool,
    pub depth: u32,
}

/// Per-level state: the payload and processed messages of this vendor
/// round.
#[derive(Debug, Default)]
pub struct LevelState {
    pub sdk_payload: Option<Value>,
    pub processed_messages: Vec<Value>,
    /// Assistant-message snapshot harvested by the raw-stream listener.
    pub assistant_snapshot: Option<String>,
}

/// Call-wide state shared across recursion levels.
#[derive(Default)]
pub struct SharedState {
    pub accumulated_usage: Option<Usage>,
    pub accumulated_metrics: Option<Metrics>,
    pub enhanced_completions: Option<CompletionsFn>,
}

impl SharedState {
    pub fn accumulate_usage(&mut self, usage: &Usage) {
        self.accumulated_usage
            .get_or_insert_with(Usage::default)
            .accumulate(usage);
    }

    pub fn accumulate_metrics(&mut self, metrics: &Metrics) {
        self.accumulated_metrics
            .get_or_insert_with(Metrics::default)
            .accumulate(metrics);
    }

    #[must_use]
    pub fn summary(&self) -> CompletionsSummary {
        CompletionsSummary {
            usage: self.accumulated_usage,
            metrics: self.accumulated_metrics,
        }
    }
}

/// The context threaded through every middleware of one completion call.
#[derive(Clone)]
pub struct CompletionsContext {
    pub client: Arc<dyn ApiClient>,
    pub recursion: RecursionState,
    level: Arc<Mutex<LevelState>>,
    shared: Arc<Mutex<SharedState>>,
}

impl CompletionsContext {
    #[must_use]
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self {
            client,
            recursion: RecursionState::default(),
            level: Arc::new(Mutex::new(LevelState::default())),
            shared: Arc::new(Mutex::new(SharedState::default())),
        }
    }

    /// Child context for one recursive tool round: fresh level state,
    /// shared accumulators, depth + 1.
    #[must_use]
    pub fn child_for_recursion(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            recursion: RecursionState {
                is_recursive: true,
                depth: self.recursion.depth + 1,
            },
            level: Arc::new(Mutex::new(LevelState::default())),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn level(&self) -> MutexGuard<'_, LevelState> {
        self.level.lock().expect("level state poisoned")
    }

    pub fn shared(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock().expect("shared state poisoned")
    }

    #[must_use]
    pub fn enhanced_completions(&self) -> Option<CompletionsFn> {
        self.shared().enhanced_completions.clone()
    }

    pub fn set_enhanced_completions(&self, composed: CompletionsFn) {
        self.shared().enhanced_completions = Some(composed);
    }
}
