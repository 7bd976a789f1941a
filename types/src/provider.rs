//! Provider and model descriptors.

use serde::{Deserialize, Serialize};

/// Vendor family an API endpoint speaks.
///
/// Azure is a configuration variant of the OpenAI-compatible wire format,
/// not a separate family; it is modelled here so the client factory can
/// apply its header/query differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    OpenAiResponses,
    AzureOpenAi,
    Claude,
    Gemini,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenAiResponses => "openai-responses",
            ProviderKind::AzureOpenAi => "azure-openai",
            ProviderKind::Claude => "claude",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Whether this provider speaks the OpenAI chat-completions wire format.
    #[must_use]
    pub fn is_openai_compatible(&self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAi | ProviderKind::OpenAiResponses | ProviderKind::AzureOpenAi
        )
    }
}

/// Connection settings for one configured provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub base_url: Option<String>,
    /// Azure deployments require an explicit API version query parameter.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub api_version: Option<String>,
}

/// A selectable model within a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context_window: Option<u32>,
    #[serde(default)]
    pub supports_reasoning: bool,
    #[serde(default)]
    pub supports_web_search: bool,
}

impl Model {
    #[must_use]
    pub fn named(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider_id: None,
            context_window: None,
            supports_reasoning: false,
            supports_web_search: false,
        }
    }

    /// Temperature is rejected by reasoning-first model families; the request
    /// transformers consult this before copying the assistant setting.
    #[must_use]
    pub fn accepts_temperature(&self) -> bool {
        let id = self.id.as_str();
        !(id.starts_with("o1") || id.starts_with("o3") || id.starts_with("gpt-5"))
    }
}

/// Requested reasoning depth for models that expose an effort dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}
