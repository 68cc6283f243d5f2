use serde::{Deserialize, Serialize};

use crate::context::ContextSelection;
use crate::store::{GenerationMode, NodeType};

/// What the caller wants generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub mode: GenerationMode,
    pub provider: String,
    pub model: String,
    /// The user's brief.
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextSelection>,
    /// Attach the new node under this parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationConfig {
    /// Create a config with the required fields.
    pub fn new(
        node_type: NodeType,
        provider: impl Into<String>,
        model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            node_type,
            mode: GenerationMode::default(),
            provider: provider.into(),
            model: model.into(),
            prompt: prompt.into(),
            context: None,
            parent_id: None,
            vertical: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the generation mode.
    pub fn with_mode(mut self, mode: GenerationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the context selection.
    pub fn with_context(mut self, context: ContextSelection) -> Self {
        self.context = Some(context);
        self
    }

    /// Attach under a parent node.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the target vertical.
    pub fn with_vertical(mut self, vertical: impl Into<String>) -> Self {
        self.vertical = Some(vertical.into());
        self
    }

    /// Set sampling temperature (clamped to 0.0-2.0).
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    /// Set the output token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Payload sent to the provider gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Node the result will be written to.
    pub node_id: String,
    pub provider: String,
    pub model: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub mode: GenerationMode,
    /// System instruction for the artifact type.
    pub system: String,
    pub prompt: String,
    /// Serialized context block; empty when no context was selected.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

/// Single-shot response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleShotResponse {
    pub success: bool,
    #[serde(default)]
    pub content: Option<String>,
    /// Output tokens.
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub tokens_input: Option<u64>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Model that actually served the request, when it differs.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SingleShotResponse {
    /// Successful response with content and usage.
    pub fn ok(content: impl Into<String>, tokens_used: u64, cost: f64) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            tokens_used: Some(tokens_used),
            cost: Some(cost),
            ..Default::default()
        }
    }

    /// Unsuccessful response with an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
