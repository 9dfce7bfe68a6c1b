//! RPC method handlers organized by domain.
//!
//! Every handler runs on behalf of the authenticated caller and scopes all
//! reads and writes to rows that caller owns. Ownership misses are reported
//! as not-found.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use abrigo_core::cache::{context_key, user_key_pattern, Cache};
use abrigo_core::ids::{CheckinId, ConversationId, GoalId, MessageId};
use abrigo_core::messages::Role;
use abrigo_crypto::EncryptionSession;
use abrigo_engine::{resources, ChatMessage, EventSink, KeyService, MessagePipeline, PipelineError, Requester};
use abrigo_store::{
    AccountRepo, CheckinRepo, CheckinRow, ConversationRepo, Database, GoalRepo, GoalRow, GoalStatus, GoalUpdate,
    MessageRepo, NewGoal, StoreError, Theme, UserRepo,
};

use crate::rpc::{self, RpcFailure, RpcResponse};

const INTERNAL_MESSAGE: &str = "Erro interno. Por favor, tente novamente.";
const CONVERSATION_NOT_FOUND: &str = "Conversa não encontrada";
const GOAL_NOT_FOUND: &str = "Meta não encontrada";
const USER_NOT_FOUND: &str = "Usuário não encontrado";

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub db: Database,
    pub keys: KeyService,
    pub pipeline: MessagePipeline,
    pub cache: Option<Arc<dyn Cache>>,
}

impl HandlerState {
    pub fn new(db: Database, keys: KeyService, pipeline: MessagePipeline) -> Self {
        Self {
            db,
            keys,
            pipeline,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    async fn session(&self, caller: &Requester) -> Result<EncryptionSession, RpcFailure> {
        self.keys
            .session_for(&caller.user_id, &caller.subject)
            .await
            .map_err(|e| match e {
                PipelineError::NotFound(_) => RpcFailure::NotFound(USER_NOT_FOUND.into()),
                other => internal(&other),
            })
    }
}

/// Route one RPC call. `sink` receives the realtime events of `chat.send`.
pub async fn dispatch(
    state: &HandlerState,
    caller: &Requester,
    method: &str,
    params: &Value,
    id: Option<Value>,
    sink: &dyn EventSink,
) -> RpcResponse {
    let result = match method {
        // Conversations
        "conversation.create" => conversation_create(state, caller, params),
        "conversation.list" => conversation_list(state, caller),
        "conversation.get" => conversation_get(state, caller, params).await,
        "conversation.rename" => conversation_rename(state, caller, params),
        "conversation.delete" => conversation_delete(state, caller, params),

        // Chat
        "chat.send" => chat_send(state, caller, params, sink).await,

        // Goals & check-ins
        "goals.list" => goals_list(state, caller, params).await,
        "goals.create" => goals_create(state, caller, params).await,
        "goals.update" => goals_update(state, caller, params).await,
        "goals.delete" => goals_delete(state, caller, params),
        "goals.checkin" => goals_checkin(state, caller, params).await,
        "goals.checkins" => goals_checkins(state, caller, params).await,

        // Account
        "user.profile" => user_profile(state, caller),
        "user.setTheme" => user_set_theme(state, caller, params),
        "user.exportData" => user_export(state, caller),
        "user.recordConsent" => user_record_consent(state, caller, params),
        "user.deleteAccount" => user_delete_account(state, caller).await,

        // Resources
        "resources.emergency" => Ok(json!({ "resources": resources::directory() })),

        // System
        "system.ping" => Ok(health(state)),

        _ => return RpcResponse::method_not_found(id, method),
    };
    RpcResponse::from_result(id, result)
}

/// Liveness plus a trivial datastore round trip.
pub fn health(state: &HandlerState) -> Value {
    let db_ok = state
        .db
        .with_conn(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
        .is_ok();
    json!({
        "status": if db_ok { "healthy" } else { "degraded" },
        "database": db_ok,
        "timestamp": Utc::now(),
    })
}

fn internal(e: &dyn std::fmt::Display) -> RpcFailure {
    error!(error = %e, "request failed");
    RpcFailure::Internal(INTERNAL_MESSAGE.into())
}

fn store_failure(e: StoreError, not_found: &str) -> RpcFailure {
    match e {
        StoreError::NotFound(_) => RpcFailure::NotFound(not_found.into()),
        StoreError::InvalidInput(msg) => RpcFailure::InvalidParams(msg),
        other => internal(&other),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, RpcFailure> {
    serde_json::to_value(value).map_err(|e| internal(&e))
}

// ── Conversations ──

#[derive(Debug, Default, Deserialize)]
struct CreateConversationParams {
    #[serde(default)]
    title: Option<String>,
}

#[instrument(skip_all, fields(method = "conversation.create", user_id = %caller.user_id))]
fn conversation_create(state: &HandlerState, caller: &Requester, params: &Value) -> Result<Value, RpcFailure> {
    let p: CreateConversationParams = rpc::parse_params(params)?;
    let row = ConversationRepo::new(state.db.clone())
        .create(&caller.user_id, p.title.as_deref())
        .map_err(|e| store_failure(e, CONVERSATION_NOT_FOUND))?;
    to_value(&row)
}

#[instrument(skip_all, fields(method = "conversation.list", user_id = %caller.user_id))]
fn conversation_list(state: &HandlerState, caller: &Requester) -> Result<Value, RpcFailure> {
    let rows = ConversationRepo::new(state.db.clone())
        .list(&caller.user_id)
        .map_err(|e| store_failure(e, CONVERSATION_NOT_FOUND))?;
    Ok(json!({ "conversations": to_value(&rows)? }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageView {
    id: MessageId,
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
}

#[instrument(skip_all, fields(method = "conversation.get", user_id = %caller.user_id))]
async fn conversation_get(state: &HandlerState, caller: &Requester, params: &Value) -> Result<Value, RpcFailure> {
    let conversation_id = ConversationId::from_raw(rpc::require_str(params, "conversationId")?);
    let conversation = ConversationRepo::new(state.db.clone())
        .get_owned(&conversation_id, &caller.user_id)
        .map_err(|e| store_failure(e, CONVERSATION_NOT_FOUND))?;
    let rows = MessageRepo::new(state.db.clone())
        .list(&conversation_id)
        .map_err(|e| store_failure(e, CONVERSATION_NOT_FOUND))?;

    let session = state.session(caller).await?;
    let messages: Vec<MessageView> = rows
        .into_iter()
        .map(|row| MessageView {
            content: session.decrypt_or_placeholder(&row.content),
            id: row.id,
            role: row.role,
            created_at: row.created_at,
        })
        .collect();

    Ok(json!({
        "conversation": to_value(&conversation)?,
        "messages": to_value(&messages)?,
    }))
}

#[instrument(skip_all, fields(method = "conversation.rename", user_id = %caller.user_id))]
fn conversation_rename(state: &HandlerState, caller: &Requester, params: &Value) -> Result<Value, RpcFailure> {
    let conversation_id = ConversationId::from_raw(rpc::require_str(params, "conversationId")?);
    let title = rpc::require_str(params, "title")?.trim();
    ConversationRepo::new(state.db.clone())
        .rename(&conversation_id, &caller.user_id, title)
        .map_err(|e| store_failure(e, CONVERSATION_NOT_FOUND))?;
    Ok(json!({ "conversationId": conversation_id, "title": title }))
}

#[instrument(skip_all, fields(method = "conversation.delete", user_id = %caller.user_id))]
fn conversation_delete(state: &HandlerState, caller: &Requester, params: &Value) -> Result<Value, RpcFailure> {
    let conversation_id = ConversationId::from_raw(rpc::require_str(params, "conversationId")?);
    ConversationRepo::new(state.db.clone())
        .delete(&conversation_id, &caller.user_id)
        .map_err(|e| store_failure(e, CONVERSATION_NOT_FOUND))?;
    Ok(json!({ "deleted": true }))
}

// ── Chat ──

async fn chat_send(
    state: &HandlerState,
    caller: &Requester,
    params: &Value,
    sink: &dyn EventSink,
) -> Result<Value, RpcFailure> {
    let message: ChatMessage = rpc::parse_params(params)?;
    match state.pipeline.handle(caller, message, sink).await {
        Ok(outcome) => Ok(json!({
            "acknowledged": true,
            "userMessageId": outcome.user_message_id,
            "replyMessageId": outcome.reply_message_id,
            "tier": outcome.tier,
            "riskLevel": outcome.assessment.risk_level,
        })),
        Err(e @ PipelineError::Validation(_)) => Err(RpcFailure::InvalidParams(e.client_message().into())),
        Err(e @ PipelineError::NotFound(_)) => Err(RpcFailure::NotFound(e.client_message().into())),
        Err(e) => Err(RpcFailure::Internal(e.client_message().into())),
    }
}

// ── Goals ──

/// A goal as the owner sees it, decrypted.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoalView {
    id: GoalId,
    title: String,
    description: Option<String>,
    target_date: Option<NaiveDate>,
    status: GoalStatus,
    progress: u8,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl GoalView {
    fn open(row: GoalRow, session: &EncryptionSession) -> Self {
        Self {
            title: session.decrypt_or_placeholder(&row.title),
            description: row.description.as_ref().map(|d| session.decrypt_or_placeholder(d)),
            id: row.id,
            target_date: row.target_date,
            status: row.status,
            progress: row.progress,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        }
    }
}

/// Goal body: either a bare title or a detailed object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GoalBody {
    Title(String),
    Detailed {
        title: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default, rename = "targetDate")]
        target_date: Option<NaiveDate>,
    },
}

impl GoalBody {
    fn into_parts(self) -> (String, Option<String>, Option<NaiveDate>) {
        match self {
            Self::Title(title) => (title, None, None),
            Self::Detailed {
                title,
                description,
                target_date,
            } => (title, description, target_date),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateGoalParams {
    goal: GoalBody,
}

#[derive(Debug, Default, Deserialize)]
struct ListGoalsParams {
    #[serde(default)]
    status: Option<GoalStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateGoalParams {
    goal_id: GoalId,
    #[serde(default)]
    status: Option<GoalStatus>,
    #[serde(default)]
    progress: Option<u8>,
}

#[instrument(skip_all, fields(method = "goals.list", user_id = %caller.user_id))]
async fn goals_list(state: &HandlerState, caller: &Requester, params: &Value) -> Result<Value, RpcFailure> {
    let p: ListGoalsParams = rpc::parse_params(params)?;
    let rows = GoalRepo::new(state.db.clone())
        .list(&caller.user_id, p.status)
        .map_err(|e| store_failure(e, GOAL_NOT_FOUND))?;
    let session = state.session(caller).await?;
    let goals: Vec<GoalView> = rows.into_iter().map(|row| GoalView::open(row, &session)).collect();
    Ok(json!({ "goals": to_value(&goals)? }))
}

#[instrument(skip_all, fields(method = "goals.create", user_id = %caller.user_id))]
async fn goals_create(state: &HandlerState, caller: &Requester, params: &Value) -> Result<Value, RpcFailure> {
    let p: CreateGoalParams = rpc::parse_params(params)?;
    let (title, description, target_date) = p.goal.into_parts();
    let title = title.trim();
    if title.is_empty() {
        return Err(RpcFailure::InvalidParams("Título da meta é obrigatório".into()));
    }
    let description = description.as_deref().map(str::trim).filter(|d| !d.is_empty());

    let session = state.session(caller).await?;
    let sealed_title = session.encrypt(title).map_err(|e| internal(&e))?;
    let sealed_description = description
        .map(|d| session.encrypt(d))
        .transpose()
        .map_err(|e| internal(&e))?;

    let row = GoalRepo::new(state.db.clone())
        .create(
            &caller.user_id,
            NewGoal {
                title: sealed_title,
                description: sealed_description,
                target_date,
            },
        )
        .map_err(|e| store_failure(e, GOAL_NOT_FOUND))?;
    info!(goal_id = %row.id, "goal created");
    to_value(&GoalView::open(row, &session))
}

#[instrument(skip_all, fields(method = "goals.update", user_id = %caller.user_id))]
async fn goals_update(state: &HandlerState, caller: &Requester, params: &Value) -> Result<Value, RpcFailure> {
    let p: UpdateGoalParams = rpc::parse_params(params)?;
    let row = GoalRepo::new(state.db.clone())
        .update(
            &p.goal_id,
            &caller.user_id,
            GoalUpdate {
                status: p.status,
                progress: p.progress,
            },
        )
        .map_err(|e| store_failure(e, GOAL_NOT_FOUND))?;
    let session = state.session(caller).await?;
    to_value(&GoalView::open(row, &session))
}

#[instrument(skip_all, fields(method = "goals.delete", user_id = %caller.user_id))]
fn goals_delete(state: &HandlerState, caller: &Requester, params: &Value) -> Result<Value, RpcFailure> {
    let goal_id = GoalId::from_raw(rpc::require_str(params, "goalId")?);
    GoalRepo::new(state.db.clone())
        .delete(&goal_id, &caller.user_id)
        .map_err(|e| store_failure(e, GOAL_NOT_FOUND))?;
    Ok(json!({ "deleted": true }))
}

// ── Check-ins ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckinView {
    id: CheckinId,
    goal_id: GoalId,
    notes: Option<String>,
    mood_score: Option<u8>,
    created_at: DateTime<Utc>,
}

impl CheckinView {
    fn open(row: CheckinRow, session: &EncryptionSession) -> Self {
        Self {
            notes: row.notes.as_ref().map(|n| session.decrypt_or_placeholder(n)),
            id: row.id,
            goal_id: row.goal_id,
            mood_score: row.mood_score,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckinParams {
    goal_id: GoalId,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    mood_score: Option<u8>,
}

#[instrument(skip_all, fields(method = "goals.checkin", user_id = %caller.user_id))]
async fn goals_checkin(state: &HandlerState, caller: &Requester, params: &Value) -> Result<Value, RpcFailure> {
    let p: CheckinParams = rpc::parse_params(params)?;
    let session = state.session(caller).await?;
    let notes = p
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| session.encrypt(n))
        .transpose()
        .map_err(|e| internal(&e))?;

    let row = CheckinRepo::new(state.db.clone())
        .create(&caller.user_id, &p.goal_id, notes.as_ref(), p.mood_score)
        .map_err(|e| store_failure(e, GOAL_NOT_FOUND))?;
    to_value(&CheckinView::open(row, &session))
}

#[instrument(skip_all, fields(method = "goals.checkins", user_id = %caller.user_id))]
async fn goals_checkins(state: &HandlerState, caller: &Requester, params: &Value) -> Result<Value, RpcFailure> {
    let goal_id = GoalId::from_raw(rpc::require_str(params, "goalId")?);
    GoalRepo::new(state.db.clone())
        .get_owned(&goal_id, &caller.user_id)
        .map_err(|e| store_failure(e, GOAL_NOT_FOUND))?;
    let rows = CheckinRepo::new(state.db.clone())
        .list_for_goal(&caller.user_id, &goal_id)
        .map_err(|e| store_failure(e, GOAL_NOT_FOUND))?;
    let session = state.session(caller).await?;
    let checkins: Vec<CheckinView> = rows.into_iter().map(|row| CheckinView::open(row, &session)).collect();
    Ok(json!({ "checkins": to_value(&checkins)? }))
}

// ── Account ──

#[derive(Debug, Deserialize)]
struct ThemeParams {
    theme: Theme,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsentParams {
    consent_type: String,
    accepted: bool,
}

fn user_profile(state: &HandlerState, caller: &Requester) -> Result<Value, RpcFailure> {
    let user = UserRepo::new(state.db.clone())
        .get(&caller.user_id)
        .map_err(|e| store_failure(e, USER_NOT_FOUND))?;
    to_value(&user.profile())
}

fn user_set_theme(state: &HandlerState, caller: &Requester, params: &Value) -> Result<Value, RpcFailure> {
    let p: ThemeParams = rpc::parse_params(params)?;
    UserRepo::new(state.db.clone())
        .set_theme(&caller.user_id, p.theme)
        .map_err(|e| store_failure(e, USER_NOT_FOUND))?;
    Ok(json!({ "theme": p.theme }))
}

#[instrument(skip_all, fields(method = "user.exportData", user_id = %caller.user_id))]
fn user_export(state: &HandlerState, caller: &Requester) -> Result<Value, RpcFailure> {
    let export = AccountRepo::new(state.db.clone())
        .export(&caller.user_id)
        .map_err(|e| store_failure(e, USER_NOT_FOUND))?;
    to_value(&export)
}

fn user_record_consent(state: &HandlerState, caller: &Requester, params: &Value) -> Result<Value, RpcFailure> {
    let p: ConsentParams = rpc::parse_params(params)?;
    AccountRepo::new(state.db.clone())
        .record_consent(&caller.user_id, &p.consent_type, p.accepted)
        .map_err(|e| store_failure(e, USER_NOT_FOUND))?;
    Ok(json!({ "recorded": true }))
}

#[instrument(skip_all, fields(method = "user.deleteAccount", user_id = %caller.user_id))]
async fn user_delete_account(state: &HandlerState, caller: &Requester) -> Result<Value, RpcFailure> {
    AccountRepo::new(state.db.clone())
        .delete_account(&caller.user_id)
        .map_err(|e| store_failure(e, USER_NOT_FOUND))?;

    if let Some(cache) = &state.cache {
        if let Err(e) = cache.delete_pattern(&user_key_pattern(&caller.user_id)).await {
            warn!(error = %e, "user cache invalidation failed");
        }
        if let Err(e) = cache.delete(&context_key(&caller.user_id)).await {
            warn!(error = %e, "context cache invalidation failed");
        }
    }
    Ok(json!({ "deleted": true }))
}
