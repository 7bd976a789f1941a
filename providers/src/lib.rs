//! Vendor chat-completion clients behind one typed contract.
//!
//! Each vendor family ships as an [`ApiClient`] bundle: request
//! transformer, stateful response-chunk transformer, and the tool/message
//! conversion helpers recursive tool rounds need. HTTP happens behind the
//! [`SdkTransport`] seam.

mod claude;
mod client;
mod error;
mod gemini;
mod openai;

use std::sync::Arc;

use hearth_types::{ProviderConfig, ProviderKind};

pub use claude::ClaudeClient;
pub use client::{
    ApiClient, CompletionsRequest, ResponseChunkTransformer, TransformedRequest, openai_role,
    truncate_to_context,
};
pub use error::SdkError;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
pub use transport::{
    HttpTransport, RawChunkStream, RawSdkOutput, SdkRequest, SdkTransport, sse_value_stream,
};

pub mod transport;

/// Select the client bundle for a provider configuration.
///
/// Unknown or OpenAI-compatible kinds (including Azure and the responses
/// API) use the OpenAI-compatible client.
#[must_use]
pub fn client_for(config: ProviderConfig, transport: Arc<dyn SdkTransport>) -> Arc<dyn ApiClient> {
    match config.kind {
        ProviderKind::Claude => Arc::new(ClaudeClient::new(config, transport)),
        ProviderKind::Gemini => Arc::new(GeminiClient::new(config, transport)),
        ProviderKind::OpenAi | ProviderKind::OpenAiResponses | ProviderKind::AzureOpenAi => {
            Arc::new(OpenAiClient::new(config, transport))
        }
    }
}
