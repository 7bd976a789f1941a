//! The final chunk consumer.

use std::sync::Arc;

use futures_util::{FutureExt, StreamExt};

use hearth_types::{GenericChunk, Metrics};

use crate::context::CompletionsFn;
use crate::error::PipelineError;
use crate::middleware::{Middleware, StageOutput};

/// Drains the generic-chunk stream to the caller's `on_chunk`.
///
/// Only the top-level call consumes: recursive invocations return their
/// stream untouched so the tool loop can inline it (which is also what
/// keeps `block_complete` and round-level `llm_response_complete` chunks
/// from being double-delivered). At stream end the top level emits the
/// single synthetic `block_complete` carrying the accumulated usage and
/// metrics.
pub struct FinalChunkConsumerMiddleware;

impl Middleware for FinalChunkConsumerMiddleware {
    fn name(&self) -> &'static str {
        "FinalChunkConsumerMiddleware"
    }

    fn wrap(self: Arc<Self>, next: CompletionsFn) -> CompletionsFn {
        Arc::new(move |ctx, params| {
            let next = Arc::clone(&next);
            async move {
                let output = next(ctx.clone(), params.clone()).await?;
                if ctx.recursion.is_recursive {
                    return Ok(output);
                }
                let StageOutput::Chunks(mut stream) = output else {
                    return Err(PipelineError::Internal(format!(
                        "consumer expected a chunk stream, found {output:?}"
                    )));
                };

                loop {
                    let chunk = match &params.abort {
                        Some(signal) => tokio::select! {
                            _ = signal.aborted() => return Err(PipelineError::Aborted),
                            chunk = stream.next() => chunk,
                        },
                        None => stream.next().await,
                    };
                    let Some(chunk) = chunk else { break };

                    match &chunk {
                        GenericChunk::LlmResponseComplete { usage, metrics } => {
                            let mut shared = ctx.shared();
                            if let Some(usage) = usage {
                                shared.accumulate_usage(usage);
                            }
                            if let Some(metrics) = metrics {
                                shared.accumulate_metrics(metrics);
                            }
                        }
                        GenericChunk::ThinkingComplete {
                            thinking_millsec, ..
                        } => {
                            ctx.shared().accumulate_metrics(&Metrics {
                                time_thinking_millsec: Some(*thinking_millsec),
                                ..Metrics::default()
                            });
                        }
                        _ => {}
                    }
                    params.emit(chunk);
                }

                let summary = ctx.shared().summary();
                params.emit(GenericChunk::BlockComplete {
                    response: Some(summary.clone()),
                });
                Ok(StageOutput::Consumed(summary))
            }
            .boxed()
        })
    }
}
