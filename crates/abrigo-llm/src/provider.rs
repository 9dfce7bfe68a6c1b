use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use abrigo_core::completion::{CompletionProvider, CompletionRequest};
use abrigo_core::errors::CompletionError;
use abrigo_core::messages::Role;
use abrigo_core::security::ApiKey;

use crate::models::ModelRoster;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const MESSAGES_PATH: &str = "/v1/messages";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Non-streaming client for the Anthropic Messages API.
pub struct AnthropicCompletion {
    client: Client,
    api_key: ApiKey,
    endpoint: String,
    roster: ModelRoster,
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl AnthropicCompletion {
    pub fn new(api_key: ApiKey, roster: ModelRoster) -> Result<Self, CompletionError> {
        Self::with_base_url(api_key, roster, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: ApiKey,
        roster: ModelRoster,
        base_url: &str,
    ) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CompletionError::NetworkError(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}{MESSAGES_PATH}", base_url.trim_end_matches('/')),
            roster,
        })
    }

    pub fn roster(&self) -> &ModelRoster {
        &self.roster
    }

    fn build_body<'a>(&'a self, request: &'a CompletionRequest) -> MessagesBody<'a> {
        let model = self.roster.for_tier(request.tier);
        MessagesBody {
            model: &model.name,
            max_tokens: request.max_tokens.unwrap_or(model.max_tokens),
            system: Some(request.system_prompt.as_str()).filter(|s| !s.is_empty()),
            messages: request
                .turns
                .iter()
                .map(|turn| WireMessage {
                    role: match turn.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: &turn.content,
                })
                .collect(),
        }
    }
}

/// `retry-after` in whole seconds, when present and parseable.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl CompletionProvider for AnthropicCompletion {
    fn name(&self) -> &str {
        "anthropic"
    }

    #[instrument(skip_all, fields(tier = %request.tier, turns = request.turns.len()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        if request.turns.is_empty() {
            return Err(CompletionError::InvalidRequest("no turns".into()));
        }
        let body = self.build_body(request);
        debug!(model = body.model, max_tokens = body.max_tokens, "sending completion");

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.0.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::NetworkError(e.to_string()))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let hint = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(match CompletionError::from_status(status, body) {
                CompletionError::RateLimited { .. } => CompletionError::RateLimited { retry_after: hint },
                other => other,
            });
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| CompletionError::InvalidRequest(format!("malformed response: {e}")))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(CompletionError::EmptyResponse);
        }
        Ok(text)
    }
}
