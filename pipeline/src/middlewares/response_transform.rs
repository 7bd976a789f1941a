//! Vendor-chunk → generic-chunk transformation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{FutureExt, StreamExt};

use hearth_providers::{RawChunkStream, ResponseChunkTransformer};
use hearth_types::{ChunkError, GenericChunk, Metrics};

use crate::context::CompletionsFn;
use crate::middleware::{Middleware, StageOutput};
use crate::stream::ChunkStream;

/// Pipes the raw vendor stream through the client's stateful chunk
/// transformer, producing the generic-chunk stream. Latency metrics
/// (first token, total completion time) are measured here and stamped
/// onto the round's `llm_response_complete` when the vendor had none.
pub struct ResponseTransformMiddleware;

impl Middleware for ResponseTransformMiddleware {
    fn name(&self) -> &'static str {
        "ResponseTransformMiddleware"
    }

    fn wrap(self: Arc<Self>, next: CompletionsFn) -> CompletionsFn {
        Arc::new(move |ctx, params| {
            let next = Arc::clone(&next);
            async move {
                let transformer = ctx.client.response_chunk_transformer();
                match next(ctx, params).await? {
                    StageOutput::RawStream(raw) => {
                        Ok(StageOutput::Chunks(transform_raw(raw, transformer)))
                    }
                    other => Ok(other),
                }
            }
            .boxed()
        })
    }
}

struct TransformState {
    raw: RawChunkStream,
    transformer: Box<dyn ResponseChunkTransformer>,
    pending: VecDeque<GenericChunk>,
    started_at: Instant,
    first_token_at: Option<Instant>,
    ended: bool,
}

impl TransformState {
    fn note_emissions(&mut self, out: Vec<GenericChunk>) {
        for mut chunk in out {
            match &mut chunk {
                GenericChunk::TextDelta { .. } | GenericChunk::ThinkingDelta { .. } => {
                    if self.first_token_at.is_none() {
                        self.first_token_at = Some(Instant::now());
                    }
                }
                GenericChunk::LlmResponseComplete { metrics, .. } => {
                    if metrics.is_none() {
                        *metrics = Some(Metrics {
                            time_first_token_millsec: self
                                .first_token_at
                                .map(|at| at.duration_since(self.started_at).as_millis() as u64),
                            time_completion_millsec: Some(
                                self.started_at.elapsed().as_millis() as u64
                            ),
                            time_thinking_millsec: None,
                        });
                    }
                }
                _ => {}
            }
            self.pending.push_back(chunk);
        }
    }
}

fn transform_raw(
    raw: RawChunkStream,
    transformer: Box<dyn ResponseChunkTransformer>,
) -> ChunkStream {
    let state = TransformState {
        raw,
        transformer,
        pending: VecDeque::new(),
        started_at: Instant::now(),
        first_token_at: None,
        ended: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((chunk, state));
            }
            if state.ended {
                return None;
            }
            match state.raw.next().await {
                Some(Ok(value)) => {
                    let mut out = Vec::new();
                    state.transformer.on_chunk(&value, &mut out);
                    state.note_emissions(out);
                }
                Some(Err(e)) => {
                    tracing::warn!("Vendor stream failed: {e}");
                    state.ended = true;
                    state
                        .pending
                        .push_back(GenericChunk::Error {
                            error: ChunkError::new(e.to_string()),
                        });
                }
                None => {
                    state.ended = true;
                    let mut out = Vec::new();
                    state.transformer.on_end(&mut out);
                    state.note_emissions(out);
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use hearth_providers::ResponseChunkTransformer;
    use hearth_types::GenericChunk;
    use serde_json::Value;

    use super::transform_raw;

    /// Emits one text delta per vendor value and a completion on end.
    struct Echo;

    impl ResponseChunkTransformer for Echo {
        fn on_chunk(&mut self, chunk: &Value, out: &mut Vec<GenericChunk>) {
            if let Some(text) = chunk.get("t").and_then(Value::as_str) {
                out.push(GenericChunk::text_delta(text));
            }
        }

        fn on_end(&mut self, out: &mut Vec<GenericChunk>) {
            out.push(GenericChunk::LlmResponseComplete {
                usage: None,
                metrics: None,
            });
        }
    }

    #[tokio::test]
    async fn stamps_metrics_on_untagged_completions() {
        let raw = Box::pin(futures_util::stream::iter(vec![
            Ok(serde_json::json!({"t": "a"})),
            Ok(serde_json::json!({"t": "b"})),
        ]));
        let chunks: Vec<_> = transform_raw(raw, Box::new(Echo)).collect().await;
        assert_eq!(chunks.len(), 3);
        let GenericChunk::LlmResponseComplete { metrics, .. } = &chunks[2] else {
            panic!("expected completion last, got {chunks:?}");
        };
        let metrics = metrics.unwrap();
        assert!(metrics.time_first_token_millsec.is_some());
        assert!(metrics.time_completion_millsec.is_some());
    }
}
