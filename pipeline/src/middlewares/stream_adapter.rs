//! Raw-output normalisation.

use std::sync::Arc;

use futures_util::FutureExt;

use hearth_providers::RawSdkOutput;

use crate::context::CompletionsFn;
use crate::middleware::{Middleware, StageOutput};

/// Normalises the vendor output to a pull-stream of vendor chunk values:
/// native streams pass through, single response objects become a
/// one-element stream.
pub struct StreamAdapterMiddleware;

impl Middleware for StreamAdapterMiddleware {
    fn name(&self) -> &'static str {
        "StreamAdapterMiddleware"
    }

    fn wrap(self: Arc<Self>, next: CompletionsFn) -> CompletionsFn {
        Arc::new(move |ctx, params| {
            let next = Arc::clone(&next);
            async move {
                match next(ctx, params).await? {
                    StageOutput::Raw(RawSdkOutput::Stream(stream)) => {
                        Ok(StageOutput::RawStream(stream))
                    }
                    StageOutput::Raw(RawSdkOutput::Single(value)) => Ok(StageOutput::RawStream(
                        Box::pin(futures_util::stream::iter(vec![Ok(value)])),
                    )),
                    other => Ok(other),
                }
            }
            .boxed()
        })
    }
}
