//! Outermost error boundary.

use std::sync::Arc;

use futures_util::FutureExt;

use hearth_types::GenericChunk;

use crate::context::CompletionsFn;
use crate::middleware::{Middleware, StageOutput};

/// Converts a failure anywhere downstream into a terminal `error` chunk on
/// `on_chunk` (an abort becomes the `pause_placeholder` error). With
/// `throw_on_error` set the error is re-thrown to the caller instead.
///
/// Recursive invocations stay transparent: their failures belong to the
/// enclosing tool loop, not to the caller.
pub struct ErrorHandlerMiddleware;

impl Middleware for ErrorHandlerMiddleware {
    fn name(&self) -> &'static str {
        "ErrorHandlerMiddleware"
    }

    fn wrap(self: Arc<Self>, next: CompletionsFn) -> CompletionsFn {
        Arc::new(move |ctx, params| {
            let next = Arc::clone(&next);
            async move {
                if ctx.recursion.is_recursive {
                    return next(ctx, params).await;
                }
                match next(ctx.clone(), params.clone()).await {
                    Ok(output) => Ok(output),
                    Err(error) => {
                        tracing::warn!("Completion failed: {error}");
                        params.emit(GenericChunk::Error {
                            error: error.to_chunk_error(),
                        });
                        if params.throw_on_error {
                            Err(error)
                        } else {
                            Ok(StageOutput::Consumed(ctx.shared().summary()))
                        }
                    }
                }
            }
            .boxed()
        })
    }
}
