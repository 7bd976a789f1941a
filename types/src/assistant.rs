//! Assistant profile settings consulted by the request transformers.

use serde::{Deserialize, Serialize};

use crate::ids::AssistantId;
use crate::provider::ReasoningEffort;

/// An assistant profile: the per-conversation persona plus the knobs the
/// request transformers apply when building a vendor payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistant {
    pub id: AssistantId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt: Option<String>,
    /// Sampling temperature; dropped for model families that reject it.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub temperature: Option<f32>,
    /// Maximum number of conversation messages sent per request.
    /// The transformer truncates from the front, keeping the newest.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context_message_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Token budget for extended thinking (Claude-style providers).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thinking_budget: Option<u32>,
    #[serde(default)]
    pub enable_web_search: bool,
}

impl Assistant {
    #[must_use]
    pub fn new(id: impl Into<AssistantId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            prompt: None,
            temperature: None,
            context_message_limit: None,
            reasoning_effort: None,
            thinking_budget: None,
            enable_web_search: false,
        }
    }

    #[must_use]
    pub fn reasoning_enabled(&self) -> bool {
        self.reasoning_effort.is_some() || self.thinking_budget.is_some()
    }
}
