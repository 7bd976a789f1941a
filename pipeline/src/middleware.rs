//! Middleware composition.
//!
//! A middleware wraps the downstream [`CompletionsFn`] and returns a new
//! one; `apply_completions_middlewares` folds the list right-to-left
//! around the SDK-call base. The composed function is stored back into the
//! context so the tool loop can re-enter the whole chain recursively.

use std::sync::Arc;

use hearth_providers::{ApiClient, RawChunkStream, RawSdkOutput};
use hearth_types::CompletionsSummary;

use crate::context::{CompletionsContext, CompletionsFn, CompletionsParams};
use crate::error::PipelineError;
use crate::middlewares::{
    ErrorHandlerMiddleware, FinalChunkConsumerMiddleware, McpToolChunkMiddleware,
    RawStreamListenerMiddleware, ResponseTransformMiddleware, SdkCallMiddleware,
    StreamAdapterMiddleware, ThinkChunkMiddleware, ThinkingTagExtractionMiddleware,
    TransformCoreToSdkParamsMiddleware, WebSearchMiddleware,
};
use crate::stream::ChunkStream;

/// What flows up the chain: the value starts as raw vendor output at the
/// SDK call and is progressively adapted on the way out.
pub enum StageOutput {
    /// Native vendor output (stream or single response).
    Raw(RawSdkOutput),
    /// Normalised pull-stream of vendor chunk values.
    RawStream(RawChunkStream),
    /// Generic-chunk stream.
    Chunks(ChunkStream),
    /// The stream was drained by the final consumer.
    Consumed(CompletionsSummary),
}

impl std::fmt::Debug for StageOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageOutput::Raw(_) => "Raw",
            StageOutput::RawStream(_) => "RawStream",
            StageOutput::Chunks(_) => "Chunks",
            StageOutput::Consumed(_) => "Consumed",
        };
        write!(f, "StageOutput::{name}")
    }
}

/// One named link of the chain.
pub trait Middleware: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn wrap(self: Arc<Self>, next: CompletionsFn) -> CompletionsFn;
}

/// Compose middlewares right-to-left around `base`.
#[must_use]
pub fn apply_completions_middlewares(
    middlewares: Vec<Arc<dyn Middleware>>,
    base: CompletionsFn,
) -> CompletionsFn {
    let mut composed = base;
    for middleware in middlewares.into_iter().rev() {
        tracing::trace!("Composing middleware {}", middleware.name());
        composed = middleware.wrap(composed);
    }
    composed
}

/// Feature switches controlling which optional middlewares the chain
/// carries.
#[derive(Debug, Clone, Copy)]
pub struct ChainFeatures {
    pub reasoning: bool,
    pub web_search: bool,
    pub tools: bool,
}

impl ChainFeatures {
    /// Derive the switches from the call parameters.
    #[must_use]
    pub fn for_params(params: &CompletionsParams) -> Self {
        Self {
            reasoning: params.assistant.reasoning_enabled(),
            web_search: params.assistant.enable_web_search,
            tools: !params.request.tools.is_empty(),
        }
    }
}

/// The default chain, outer → inner. Disabled features drop their
/// middlewares entirely.
#[must_use]
pub fn default_chain(features: ChainFeatures) -> Vec<Arc<dyn Middleware>> {
    let mut chain: Vec<Arc<dyn Middleware>> = Vec::new();
    chain.push(Arc::new(ErrorHandlerMiddleware));
    chain.push(Arc::new(FinalChunkConsumerMiddleware));
    if features.tools {
        chain.push(Arc::new(McpToolChunkMiddleware));
    }
    if features.reasoning {
        chain.push(Arc::new(ThinkChunkMiddleware));
        chain.push(Arc::new(ThinkingTagExtractionMiddleware));
    }
    if features.web_search {
        chain.push(Arc::new(WebSearchMiddleware));
    }
    chain.push(Arc::new(ResponseTransformMiddleware));
    chain.push(Arc::new(StreamAdapterMiddleware));
    chain.push(Arc::new(RawStreamListenerMiddleware));
    chain.push(Arc::new(TransformCoreToSdkParamsMiddleware));
    chain
}

/// Run one user-facing completion call through the default chain.
///
/// Exactly one generic-chunk stream reaches `params.on_chunk`, recursive
/// tool rounds included; the returned summary carries the accumulated
/// usage and metrics.
pub async fn complete(
    client: Arc<dyn ApiClient>,
    params: CompletionsParams,
) -> Result<CompletionsSummary, PipelineError> {
    let ctx = CompletionsContext::new(client);
    let chain = default_chain(ChainFeatures::for_params(&params));
    let composed = apply_completions_middlewares(chain, SdkCallMiddleware::base());
    ctx.set_enhanced_completions(composed.clone());

    match composed(ctx, params).await? {
        StageOutput::Consumed(summary) => Ok(summary),
        other => Err(PipelineError::Internal(format!(
            "completion chain ended in {other:?} instead of a consumed stream"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::FutureExt;

    use super::{Middleware, StageOutput, apply_completions_middlewares};
    use crate::context::{CompletionsContext, CompletionsFn};

    struct Recorder {
        name: &'static str,
        log: Arc<std::sync::Mutex<Vec<&'static str>>>,
        calls: Arc<AtomicUsize>,
    }

    impl Middleware for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn wrap(self: Arc<Self>, next: CompletionsFn) -> CompletionsFn {
            Arc::new(move |ctx, params| {
                let this = Arc::clone(&self);
                let next = Arc::clone(&next);
                async move {
                    this.log.lock().unwrap().push(this.name);
                    this.calls.fetch_add(1, Ordering::SeqCst);
                    next(ctx, params).await
                }
                .boxed()
            })
        }
    }

    #[tokio::test]
    async fn composition_runs_outer_to_inner() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Recorder {
                name: "outer",
                log: log.clone(),
                calls: calls.clone(),
            }),
            Arc::new(Recorder {
                name: "inner",
                log: log.clone(),
                calls: calls.clone(),
            }),
        ];
        let base: CompletionsFn = Arc::new(|_ctx, _params| {
            async {
                Ok(StageOutput::Consumed(
                    hearth_types::CompletionsSummary::default(),
                ))
            }
            .boxed()
        });

        let composed = apply_completions_middlewares(chain, base);
        let ctx = CompletionsContext::new(crate::testing::null_client());
        let params = crate::testing::basic_params();
        composed(ctx, params).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
