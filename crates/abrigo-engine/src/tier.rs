use abrigo_core::completion::ModelTier;
use abrigo_core::risk::RiskLevel;

use crate::safety::{self, KeywordSignal};

/// Messages scoring above this go to the advanced tier.
pub const COMPLEXITY_THRESHOLD: u8 = 7;
pub const MAX_COMPLEXITY: u8 = 10;

/// Rough 0–10 estimate of how much a message asks of the assistant.
///
/// Points: length (up to 4), questions (up to 3), extra paragraphs (up to 2),
/// any risk phrase (1).
pub fn complexity_score(message: &str) -> u8 {
    let text = message.trim();

    let length = match text.chars().count() {
        0..=79 => 0,
        80..=199 => 1,
        200..=399 => 2,
        400..=799 => 3,
        _ => 4,
    };
    let questions = text.matches('?').count().min(3) as u8;
    let paragraphs = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .count()
        .saturating_sub(1)
        .min(2) as u8;
    let risk = u8::from(safety::keyword_signal(text) != KeywordSignal::None);

    (length + questions + paragraphs + risk).min(MAX_COMPLEXITY)
}

pub fn select_tier(is_first_message: bool, complexity: u8, risk_level: RiskLevel) -> ModelTier {
    if is_first_message || complexity > COMPLEXITY_THRESHOLD || risk_level == RiskLevel::High {
        ModelTier::Advanced
    } else {
        ModelTier::Standard
    }
}
