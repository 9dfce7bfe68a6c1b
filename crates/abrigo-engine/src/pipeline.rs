use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, instrument, warn, Span};

use abrigo_core::cache::Cache;
use abrigo_core::completion::{CompletionProvider, CompletionRequest, ModelTier};
use abrigo_core::events::ChatEvent;
use abrigo_core::ids::{ConversationId, MessageId, UserId};
use abrigo_core::messages::{Role, Turn};
use abrigo_core::risk::RiskAssessment;
use abrigo_crypto::EncryptionSession;
use abrigo_store::conversations::title_from_message;
use abrigo_store::{ConversationRepo, Database, MessageRepo, PatternRepo, UserRepo};

use crate::context::{ContextAssembler, UserContext};
use crate::error::PipelineError;
use crate::keys::KeyService;
use crate::prompt::build_system_prompt;
use crate::safety::RiskClassifier;
use crate::sink::EventSink;
use crate::tier;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Upper bound on the reply completion call.
    pub completion_timeout: Duration,
    /// Stored messages loaded as history.
    pub history_window: u32,
    /// History turns sent along with an advanced-tier request.
    pub reply_history: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            completion_timeout: Duration::from_secs(60),
            history_window: 20,
            reply_history: 10,
        }
    }
}

/// The authenticated sender of a message.
#[derive(Clone, Debug)]
pub struct Requester {
    pub user_id: UserId,
    /// Identity-provider subject; keys the user's encryption.
    pub subject: String,
}

/// Inbound chat message as decoded from the client.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub message: String,
    /// Client-supplied complexity (0-10). Overrides the local heuristic.
    #[serde(default)]
    pub complexity_score: Option<u8>,
}

#[derive(Clone, Debug)]
pub struct ChatOutcome {
    pub user_message_id: MessageId,
    pub reply_message_id: MessageId,
    pub tier: ModelTier,
    pub title_updated: bool,
    pub assessment: RiskAssessment,
}

#[derive(Default)]
struct RunState {
    conversation_id: Option<ConversationId>,
    typing: bool,
}

/// Runs one inbound message from receipt to stored reply, emitting events
/// to the caller's sink along the way.
///
/// Event order for a run: `message_saved`, `conversation_title_updated`
/// (first message only), `assistant_typing` on, `emergency_detected` (if
/// any), `assistant_typing` off, then `assistant_message`. A failure emits
/// typing off (if it was on) followed by a single `error`.
pub struct MessagePipeline {
    conversations: ConversationRepo,
    messages: MessageRepo,
    users: UserRepo,
    patterns: PatternRepo,
    keys: KeyService,
    assembler: ContextAssembler,
    classifier: RiskClassifier,
    provider: Arc<dyn CompletionProvider>,
    config: PipelineConfig,
}

impl MessagePipeline {
    pub fn new(
        db: Database,
        keys: KeyService,
        provider: Arc<dyn CompletionProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            conversations: ConversationRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            users: UserRepo::new(db.clone()),
            patterns: PatternRepo::new(db.clone()),
            keys,
            assembler: ContextAssembler::new(db),
            classifier: RiskClassifier::new(provider.clone()),
            provider,
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        self.assembler = self.assembler.with_cache(cache, ttl);
        self
    }

    pub fn with_classifier(mut self, classifier: RiskClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[instrument(skip_all, fields(user_id = %requester.user_id, conversation_id = tracing::field::Empty))]
    pub async fn handle(
        &self,
        requester: &Requester,
        message: ChatMessage,
        sink: &dyn EventSink,
    ) -> Result<ChatOutcome, PipelineError> {
        let mut state = RunState::default();
        let result = self.run(requester, message, sink, &mut state).await;

        if let Err(e) = &result {
            if e.is_rejection() {
                warn!(error = %e, "chat message rejected");
            } else {
                error!(error = %e, "chat message failed");
            }
            if state.typing {
                if let Some(conversation_id) = &state.conversation_id {
                    sink.emit(typing(conversation_id, false)).await;
                }
            }
            sink.emit(ChatEvent::error(state.conversation_id, e.client_message()))
                .await;
        }
        result
    }

    async fn run(
        &self,
        requester: &Requester,
        message: ChatMessage,
        sink: &dyn EventSink,
        state: &mut RunState,
    ) -> Result<ChatOutcome, PipelineError> {
        let user_id = &requester.user_id;

        // 1. Validate and check ownership before touching anything
        let conversation_id = message
            .conversation_id
            .filter(|id| !id.as_str().trim().is_empty())
            .ok_or_else(|| PipelineError::Validation("conversation id required".into()))?;
        state.conversation_id = Some(conversation_id.clone());
        Span::current().record("conversation_id", conversation_id.as_str());

        let text = message.message;
        let complexity_override = message.complexity_score;
        if text.trim().is_empty() {
            return Err(PipelineError::Validation("message body required".into()));
        }
        self.conversations.get_owned(&conversation_id, user_id)?;

        // 2. Encrypt and persist the user's message. Store failures past
        // this point are internal, not rejections
        let session = self.keys.session_for(user_id, &requester.subject).await?;
        let saved = self
            .messages
            .insert(&conversation_id, Role::User, &session.encrypt(&text)?)?;
        sink.emit(ChatEvent::MessageSaved {
            conversation_id: conversation_id.clone(),
            message_id: saved.id.clone(),
            timestamp: saved.created_at,
        })
        .await;

        // 3. Title from the first message (best-effort)
        let is_first_message = match self.messages.count_by_role(&conversation_id, Role::User) {
            Ok(count) => count == 1,
            Err(e) => {
                warn!(error = %e, "message count unavailable");
                false
            }
        };
        let title_updated = is_first_message && self.retitle(&conversation_id, &text, sink).await;

        state.typing = true;
        sink.emit(typing(&conversation_id, true)).await;

        // 4. Recent history, undecryptable entries dropped
        let history = self.history(&conversation_id, &saved.id, &session);

        // 5. Risk
        let assessment = self.classifier.assess(&text, &history).await;
        if assessment.is_emergency {
            sink.emit(ChatEvent::EmergencyDetected {
                conversation_id: conversation_id.clone(),
                assessment: assessment.clone(),
            })
            .await;
            let raised = self
                .users
                .raise_risk_level(user_id, assessment.risk_level)
                .map_err(PipelineError::Store)?;
            info!(risk_level = %assessment.risk_level, raised, "emergency detected");
        }

        // 6. Reply
        let ctx = self.assembler.assemble(user_id, &session, is_first_message).await?;
        let ctx = UserContext {
            risk_level: ctx.risk_level.max(assessment.risk_level),
            ..ctx
        };
        let complexity = complexity_override
            .map(|score| score.min(tier::MAX_COMPLEXITY))
            .unwrap_or_else(|| tier::complexity_score(&text));
        let tier = tier::select_tier(is_first_message, complexity, ctx.risk_level);
        let turns = match tier {
            ModelTier::Advanced => {
                let skip = history.len().saturating_sub(self.config.reply_history);
                let mut turns: Vec<Turn> = history.into_iter().skip(skip).collect();
                turns.push(Turn::user(text.clone()));
                turns
            }
            ModelTier::Standard => vec![Turn::user(text.clone())],
        };
        let request = CompletionRequest::new(build_system_prompt(&ctx), turns, tier);

        let reply = tokio::time::timeout(self.config.completion_timeout, self.provider.complete(&request))
            .await
            .map_err(|_| PipelineError::Timeout(self.config.completion_timeout))??;

        state.typing = false;
        sink.emit(typing(&conversation_id, false)).await;

        // 7. Encrypt and persist the reply
        let stored = self
            .messages
            .insert(&conversation_id, Role::Assistant, &session.encrypt(&reply)?)
            .map_err(PipelineError::Store)?;
        sink.emit(ChatEvent::AssistantMessage {
            conversation_id: conversation_id.clone(),
            message_id: stored.id.clone(),
            message: reply,
            timestamp: stored.created_at,
            emergency_context: assessment.is_emergency.then(|| assessment.clone()),
        })
        .await;

        // 8. Patterns (best-effort, idempotent)
        if !assessment.patterns.is_empty() {
            match self
                .patterns
                .record_all(user_id, assessment.patterns.iter().map(String::as_str))
            {
                Ok(0) => {}
                Ok(added) => {
                    info!(added, "new patterns identified");
                    self.assembler.invalidate(user_id).await;
                }
                Err(e) => warn!(error = %e, "failed to record patterns"),
            }
        }

        Ok(ChatOutcome {
            user_message_id: saved.id,
            reply_message_id: stored.id,
            tier,
            title_updated,
            assessment,
        })
    }

    async fn retitle(&self, conversation_id: &ConversationId, text: &str, sink: &dyn EventSink) -> bool {
        let title = title_from_message(text);
        match self.conversations.set_title_if_default(conversation_id, &title) {
            Ok(true) => {
                sink.emit(ChatEvent::TitleUpdated {
                    conversation_id: conversation_id.clone(),
                    title,
                })
                .await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(error = %e, "automatic title failed");
                false
            }
        }
    }

    fn history(&self, conversation_id: &ConversationId, current: &MessageId, session: &EncryptionSession) -> Vec<Turn> {
        let rows = match self.messages.recent(conversation_id, self.config.history_window) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "history unavailable");
                return Vec::new();
            }
        };
        rows.into_iter()
            .filter(|row| &row.id != current)
            .filter_map(|row| match session.decrypt(&row.content) {
                Ok(content) => Some(Turn {
                    role: row.role,
                    content,
                }),
                Err(_) => {
                    warn!(message_id = %row.id, "dropping undecryptable history entry");
                    None
                }
            })
            .collect()
    }
}

fn typing(conversation_id: &ConversationId, is_typing: bool) -> ChatEvent {
    ChatEvent::AssistantTyping {
        conversation_id: conversation_id.clone(),
        is_typing,
    }
}
