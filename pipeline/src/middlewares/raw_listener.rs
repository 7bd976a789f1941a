//! Raw-stream listener hook.

use std::sync::Arc;

use futures_util::FutureExt;

use crate::context::CompletionsFn;
use crate::middleware::{Middleware, StageOutput};

/// Gives the client a chance to observe the raw vendor output before it
/// is adapted; vendors with event-emitter semantics use this to snapshot
/// the final assistant message for recursive rounds. Clients without that
/// behaviour keep the output untouched.
pub struct RawStreamListenerMiddleware;

impl Middleware for RawStreamListenerMiddleware {
    fn name(&self) -> &'static str {
        "RawStreamListenerMiddleware"
    }

    fn wrap(self: Arc<Self>, next: CompletionsFn) -> CompletionsFn {
        Arc::new(move |ctx, params| {
            let next = Arc::clone(&next);
            async move {
                let output = next(ctx.clone(), params).await?;
                match output {
                    StageOutput::Raw(raw) => {
                        Ok(StageOutput::Raw(ctx.client.attach_raw_stream_listener(raw)))
                    }
                    other => Ok(other),
                }
            }
            .boxed()
        })
    }
}
