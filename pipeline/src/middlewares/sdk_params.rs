//! Core-request → vendor-payload transform.

use std::sync::Arc;

use futures_util::FutureExt;

use crate::context::CompletionsFn;
use crate::middleware::Middleware;

/// Runs the client's request transformer and stages the payload and the
/// processed message list on the level state. Recursive rounds hand the
/// transformer the prebuilt messages the tool loop assembled.
pub struct TransformCoreToSdkParamsMiddleware;

impl Middleware for TransformCoreToSdkParamsMiddleware {
    fn name(&self) -> &'static str {
        "TransformCoreToSdkParamsMiddleware"
    }

    fn wrap(self: Arc<Self>, next: CompletionsFn) -> CompletionsFn {
        Arc::new(move |ctx, params| {
            let next = Arc::clone(&next);
            async move {
                let transformed = ctx.client.transform_request(
                    &params.request,
                    &params.assistant,
                    &params.model,
                    ctx.recursion.is_recursive,
                    params.prebuilt_messages.as_deref(),
                )?;
                {
                    let mut level = ctx.level();
                    level.sdk_payload = Some(transformed.payload);
                    level.processed_messages = transformed.messages;
                }
                next(ctx, params).await
            }
            .boxed()
        })
    }
}
