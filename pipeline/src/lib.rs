//! The AI completions pipeline.
//!
//! A middleware stack wraps the vendor clients behind a single typed
//! contract: requests transform into vendor payloads, vendor streams adapt
//! into a pull-stream of [`hearth_types::GenericChunk`]s, tool-use chunks
//! loop back through recursive completions, and the block manager mirrors
//! everything into the streaming cache until the consolidated message is
//! persisted.

mod block_manager;
mod cache;
mod context;
mod error;
mod middleware;
mod middlewares;
mod service;
mod stream;

#[cfg(test)]
mod tests;

pub use block_manager::{
    BlockManager, BlockUpdateThrottle, ChunkDispatcher, ImmediateThrottle,
};
pub use cache::{CacheValue, MemoryCache, SubscriptionId, keys};
pub use context::{
    AbortSignal, ChunkHandler, CompletionsContext, CompletionsFn, CompletionsParams,
    RecursionState, ToolExecutor,
};
pub use error::{MAX_TOOL_RECURSION_DEPTH, PipelineError};
pub use middleware::{
    ChainFeatures, Middleware, StageOutput, apply_completions_middlewares, complete,
    default_chain,
};
pub use middlewares::{
    ErrorHandlerMiddleware, FinalChunkConsumerMiddleware, McpToolChunkMiddleware,
    RawStreamListenerMiddleware, ResponseTransformMiddleware, SdkCallMiddleware,
    StreamAdapterMiddleware, ThinkChunkMiddleware, ThinkingTagExtractionMiddleware,
    TransformCoreToSdkParamsMiddleware, WebSearchMiddleware,
};
pub use service::{
    MessagePersistence, SqliteMessageSink, StartTaskOptions, StreamingService, StreamingTask,
    TASK_TTL,
};
pub use stream::{ChunkStream, ChunkTransform, channel_stream, iter_stream, transform_stream};
