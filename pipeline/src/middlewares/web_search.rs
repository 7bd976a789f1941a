//! Web-search observation.

use std::sync::Arc;

use futures_util::FutureExt;

use hearth_types::GenericChunk;

use crate::context::CompletionsFn;
use crate::middleware::{Middleware, StageOutput};
use crate::stream::{ChunkTransform, transform_stream};

/// Passes web-search chunks through, logging result volume; the counter
/// resets on each `llm_response_complete` so recursive rounds count
/// separately.
pub struct WebSearchMiddleware;

impl Middleware for WebSearchMiddleware {
    fn name(&self) -> &'static str {
        "WebSearchMiddleware"
    }

    fn wrap(self: Arc<Self>, next: CompletionsFn) -> CompletionsFn {
        Arc::new(move |ctx, params| {
            let next = Arc::clone(&next);
            async move {
                match next(ctx, params).await? {
                    StageOutput::Chunks(stream) => Ok(StageOutput::Chunks(transform_stream(
                        stream,
                        WebSearchState::default(),
                    ))),
                    other => Ok(other),
                }
            }
            .boxed()
        })
    }
}

#[derive(Default)]
struct WebSearchState {
    completed_searches: u32,
}

impl ChunkTransform for WebSearchState {
    fn on_chunk(&mut self, chunk: GenericChunk, out: &mut Vec<GenericChunk>) {
        match &chunk {
            GenericChunk::LlmWebSearchInProgress => {
                tracing::debug!("Web search in progress");
            }
            GenericChunk::LlmWebSearchComplete { results } => {
                self.completed_searches += 1;
                tracing::info!(
                    "Web search #{} complete (source {:?})",
                    self.completed_searches,
                    results.source
                );
            }
            GenericChunk::LlmResponseComplete { .. } => {
                self.completed_searches = 0;
            }
            _ => {}
        }
        out.push(chunk);
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use hearth_types::{GenericChunk, WebSearchResults, WebSearchSource};

    use super::WebSearchState;
    use crate::stream::{iter_stream, transform_stream};

    #[tokio::test]
    async fn chunks_pass_through_unchanged() {
        let chunks = vec![
            GenericChunk::LlmWebSearchInProgress,
            GenericChunk::LlmWebSearchComplete {
                results: WebSearchResults {
                    source: WebSearchSource::Provider,
                    results: serde_json::json!([]),
                },
            },
            GenericChunk::text_delta("x"),
        ];
        let out: Vec<_> = transform_stream(iter_stream(chunks.clone()), WebSearchState::default())
            .collect()
            .await;
        assert_eq!(out, chunks);
    }
}
