//! Risk classification for inbound messages.
//!
//! High-severity phrases short-circuit to an emergency without any external
//! call. Moderate phrases ask the completion provider for a structured
//! verdict. Anything else is low risk. Every failure on the moderate path
//! degrades to the safe default.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use abrigo_core::completion::{CompletionProvider, CompletionRequest, ModelTier};
use abrigo_core::messages::Turn;
use abrigo_core::risk::{RiskAssessment, RiskLevel};

use crate::resources;

pub const HIGH_RISK_PHRASES: &[&str] = &[
    "vai me matar",
    "me machucou",
    "estou com medo",
    "me bateu",
    "ameaçou",
    "violência",
    "não aguento mais",
    "quero morrer",
    "acabar com tudo",
    "me estuprou",
    "abusou sexualmente",
    "tem uma arma",
    "vai me machucar",
    "estou em perigo",
];

pub const MEDIUM_RISK_PHRASES: &[&str] = &[
    "controla meu dinheiro",
    "não me deixa sair",
    "xingou muito",
    "quebrou minhas coisas",
    "isolou de amigos",
    "stalking",
    "perseguição",
    "não aceita o término",
    "me ameaça",
];

/// Turns of recent history sent along with a moderate-risk message.
pub const CLASSIFIER_HISTORY: usize = 5;
const CLASSIFIER_MAX_TOKENS: u32 = 512;
const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(20);

const IMMEDIATE_DANGER_MESSAGE: &str =
    "⚠️ ATENÇÃO: Identifiquei sinais de risco imediato. Sua segurança é prioridade.";
const ESCALATED_MESSAGE: &str =
    "⚠️ ATENÇÃO: Identifiquei sinais de risco. Vamos conversar sobre sua segurança.";

const CLASSIFIER_SYSTEM: &str = "Você é um classificador de risco para um serviço de apoio a \
pessoas em relacionamentos abusivos. Responda somente com JSON válido.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeywordSignal {
    None,
    Moderate,
    Immediate,
}

/// Case-insensitive phrase scan. Immediate wins over moderate.
pub fn keyword_signal(message: &str) -> KeywordSignal {
    let lower = message.to_lowercase();
    if HIGH_RISK_PHRASES.iter().any(|p| lower.contains(p)) {
        KeywordSignal::Immediate
    } else if MEDIUM_RISK_PHRASES.iter().any(|p| lower.contains(p)) {
        KeywordSignal::Moderate
    } else {
        KeywordSignal::None
    }
}

/// Structured answer expected from the classifier model.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Verdict {
    risk_level: String,
    is_emergency: bool,
    patterns: Vec<String>,
    suggested_actions: Vec<String>,
    reasoning: Option<String>,
}

#[derive(Serialize)]
struct HistoryLine<'a> {
    role: &'static str,
    content: &'a str,
}

pub struct RiskClassifier {
    provider: Arc<dyn CompletionProvider>,
    timeout: Duration,
}

impl RiskClassifier {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            timeout: DEFAULT_CLASSIFIER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Assess `message` given the turns that preceded it (oldest first).
    #[instrument(skip_all, fields(history = history.len()))]
    pub async fn assess(&self, message: &str, history: &[Turn]) -> RiskAssessment {
        match keyword_signal(message) {
            KeywordSignal::Immediate => immediate_danger(),
            KeywordSignal::None => RiskAssessment::safe(),
            KeywordSignal::Moderate => {
                let recent = &history[history.len().saturating_sub(CLASSIFIER_HISTORY)..];
                match self.classify(message, recent).await {
                    Some(verdict) => from_verdict(verdict),
                    None => RiskAssessment::safe(),
                }
            }
        }
    }

    async fn classify(&self, message: &str, recent: &[Turn]) -> Option<Verdict> {
        let mut request = CompletionRequest::new(
            CLASSIFIER_SYSTEM,
            vec![Turn::user(classifier_prompt(message, recent))],
            ModelTier::Standard,
        );
        request.max_tokens = Some(CLASSIFIER_MAX_TOKENS);

        let reply = match tokio::time::timeout(self.timeout, self.provider.complete(&request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(error_kind = e.error_kind(), "risk classification call failed");
                return None;
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "risk classification timed out");
                return None;
            }
        };

        let verdict = parse_verdict(&reply);
        if verdict.is_none() {
            warn!("risk classification reply was not valid JSON");
        }
        verdict
    }
}

fn immediate_danger() -> RiskAssessment {
    RiskAssessment {
        risk_level: RiskLevel::High,
        is_emergency: true,
        patterns: Vec::new(),
        suggested_actions: vec![
            "call-190".into(),
            "safe-place".into(),
            "emergency-contacts".into(),
        ],
        message: Some(IMMEDIATE_DANGER_MESSAGE.into()),
        resources: resources::immediate_danger(),
    }
}

fn from_verdict(verdict: Verdict) -> RiskAssessment {
    let risk_level = verdict
        .risk_level
        .trim()
        .to_lowercase()
        .parse::<RiskLevel>()
        .unwrap_or_default();
    if let Some(reasoning) = &verdict.reasoning {
        debug!(risk_level = %risk_level, reasoning_len = reasoning.len(), "classifier verdict");
    }
    let high = risk_level == RiskLevel::High;
    RiskAssessment {
        risk_level,
        is_emergency: verdict.is_emergency,
        patterns: verdict
            .patterns
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        suggested_actions: verdict.suggested_actions,
        message: high.then(|| ESCALATED_MESSAGE.to_string()),
        resources: if high { resources::escalated() } else { Vec::new() },
    }
}

fn classifier_prompt(message: &str, recent: &[Turn]) -> String {
    let history: Vec<HistoryLine<'_>> = recent
        .iter()
        .map(|t| HistoryLine {
            role: t.role.as_str(),
            content: &t.content,
        })
        .collect();
    let history = serde_json::to_string(&history).unwrap_or_else(|_| "[]".into());
    let message = serde_json::to_string(message).unwrap_or_else(|_| "\"\"".into());

    format!(
        "Analise a mensagem abaixo e o histórico de conversa para determinar:
1. Nível de risco: low/medium/high
2. É emergência que requer ação imediata? true/false
3. Padrões abusivos identificados
4. Ações sugeridas

Mensagem atual: {message}

Histórico recente: {history}

Retorne JSON válido:
{{
  \"riskLevel\": \"low|medium|high\",
  \"isEmergency\": true|false,
  \"patterns\": [\"pattern1\", \"pattern2\"],
  \"suggestedActions\": [\"action1\", \"action2\"],
  \"reasoning\": \"explicação breve\"
}}"
    )
}

/// Parse the classifier reply, tolerating prose or code fences around the
/// JSON object.
fn parse_verdict(reply: &str) -> Option<Verdict> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}
