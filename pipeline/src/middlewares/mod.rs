//! The default middleware stack, outer → inner: error boundary, final
//! consumer, tool loop, thinking, web search, response transform, stream
//! adapter, raw listener, params transform, SDK call.

mod consumer;
mod error_handler;
mod raw_listener;
mod response_transform;
mod sdk_call;
mod sdk_params;
mod stream_adapter;
mod thinking;
mod tool_loop;
mod web_search;

pub use consumer::FinalChunkConsumerMiddleware;
pub use error_handler::ErrorHandlerMiddleware;
pub use raw_listener::RawStreamListenerMiddleware;
pub use response_transform::ResponseTransformMiddleware;
pub use sdk_call::SdkCallMiddleware;
pub use sdk_params::TransformCoreToSdkParamsMiddleware;
pub use stream_adapter::StreamAdapterMiddleware;
pub use thinking::{ThinkChunkMiddleware, ThinkingTagExtractionMiddleware};
pub use tool_loop::McpToolChunkMiddleware;
pub use web_search::WebSearchMiddleware;
