use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::CompletionError;
use crate::messages::Turn;

/// Model capability tier. The provider maps each tier to a concrete model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheaper model, also used for classification and summarization.
    #[default]
    Standard,
    Advanced,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => f.write_str("standard"),
            Self::Advanced => f.write_str("advanced"),
        }
    }
}

/// A single prompt-completion request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    /// Ordered turns; the last one is the user's current message.
    pub turns: Vec<Turn>,
    pub tier: ModelTier,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, turns: Vec<Turn>, tier: ModelTier) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            turns,
            tier,
            max_tokens: None,
        }
    }
}

/// Produces a reply string for a system prompt and message history.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}
