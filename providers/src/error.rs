//! Vendor call errors.

/// Errors raised while talking to a vendor endpoint.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("stream produced invalid data: {0}")]
    InvalidStream(String),

    #[error("SSE buffer exceeded maximum size")]
    StreamTooLarge,

    #[error("request aborted")]
    Aborted,

    #[error("{0}")]
    Other(String),
}

impl SdkError {
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, SdkError::Aborted)
    }
}
