//! The innermost link: the actual vendor call.

use std::sync::Arc;

use futures_util::FutureExt;

use hearth_providers::SdkError;
use hearth_types::GenericChunk;

use crate::context::CompletionsFn;
use crate::error::PipelineError;
use crate::middleware::StageOutput;

/// Emits `llm_response_created` up-front (top-level calls only; the
/// caller sees one created chunk per user-facing call, not per tool
/// round), then issues `create_completions` with the payload the params
/// transform staged.
pub struct SdkCallMiddleware;

impl SdkCallMiddleware {
    #[must_use]
    pub fn base() -> CompletionsFn {
        Arc::new(|ctx, params| {
            async move {
                if !ctx.recursion.is_recursive {
                    params.emit(GenericChunk::LlmResponseCreated { response_id: None });
                }

                let payload = ctx
                    .level()
                    .sdk_payload
                    .clone()
                    .ok_or_else(|| {
                        PipelineError::Internal(
                            "sdk payload missing: params transform did not run".to_string(),
                        )
                    })?;

                let call = ctx.client.create_completions(&payload);
                let output = match &params.abort {
                    Some(signal) => {
                        tokio::select! {
                            _ = signal.aborted() => return Err(PipelineError::Aborted),
                            output = call => output,
                        }
                    }
                    None => call.await,
                };

                match output {
                    Ok(output) => Ok(StageOutput::Raw(output)),
                    Err(SdkError::Aborted) => Err(PipelineError::Aborted),
                    Err(e) => Err(PipelineError::Sdk(e)),
                }
            }
            .boxed()
        })
    }
}
