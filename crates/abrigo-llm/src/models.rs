use abrigo_core::completion::ModelTier;

/// Static facts about a Claude model the assistant is known to run on.
#[derive(Clone, Debug)]
pub struct ClaudeModelInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub context_window: usize,
    pub max_output: u32,
}

pub static CLAUDE_3_HAIKU: ClaudeModelInfo = ClaudeModelInfo {
    name: "claude-3-haiku-20240307",
    display_name: "Claude 3 Haiku",
    context_window: 200_000,
    max_output: 4_096,
};

pub static CLAUDE_3_5_SONNET: ClaudeModelInfo = ClaudeModelInfo {
    name: "claude-3-5-sonnet-20241022",
    display_name: "Claude 3.5 Sonnet",
    context_window: 200_000,
    max_output: 8_192,
};

static ALL_MODELS: &[&ClaudeModelInfo] = &[&CLAUDE_3_HAIKU, &CLAUDE_3_5_SONNET];

pub fn find_model(name: &str) -> Option<&'static ClaudeModelInfo> {
    ALL_MODELS.iter().find(|m| m.name == name).copied()
}

/// Concrete model and output budget for one tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierModel {
    pub name: String,
    pub max_tokens: u32,
}

impl TierModel {
    pub fn new(name: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            name: name.into(),
            max_tokens,
        }
    }
}

/// Tier → model mapping used by a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelRoster {
    pub standard: TierModel,
    pub advanced: TierModel,
}

impl Default for ModelRoster {
    fn default() -> Self {
        Self {
            standard: TierModel::new(CLAUDE_3_HAIKU.name, 1024),
            advanced: TierModel::new(CLAUDE_3_5_SONNET.name, 2048),
        }
    }
}

impl ModelRoster {
    pub fn for_tier(&self, tier: ModelTier) -> &TierModel {
        match tier {
            ModelTier::Standard => &self.standard,
            ModelTier::Advanced => &self.advanced,
        }
    }

    /// Clamp each tier's budget to the model's output limit when the model is
    /// known. Unknown models are passed through untouched.
    pub fn clamped(mut self) -> Self {
        for tier in [&mut self.standard, &mut self.advanced] {
            if let Some(info) = find_model(&tier.name) {
                tier.max_tokens = tier.max_tokens.min(info.max_output);
            }
        }
        self
    }
}
