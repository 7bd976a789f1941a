//! Pipeline failure kinds.

use hearth_providers::SdkError;
use hearth_types::ChunkError;

/// Maximum recursive tool-call depth.
pub const MAX_TOOL_RECURSION_DEPTH: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Sdk(#[from] SdkError),

    #[error("tool recursion exceeded depth {depth}")]
    ToolRecursionExceeded { depth: u32 },

    #[error("completion aborted")]
    Aborted,

    #[error("{0}")]
    Internal(String),
}

impl PipelineError {
    /// The error chunk surfaced to `on_chunk` for this failure.
    #[must_use]
    pub fn to_chunk_error(&self) -> ChunkError {
        match self {
            PipelineError::Aborted => ChunkError::aborted(),
            PipelineError::Sdk(SdkError::Aborted) => ChunkError::aborted(),
            PipelineError::ToolRecursionExceeded { depth } => {
                let mut error = ChunkError::new(self.to_string());
                error.code = Some("tool_recursion_exceeded".to_string());
                let _ = depth;
                error
            }
            other => ChunkError::new(other.to_string()),
        }
    }
}
