use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId};
use crate::risk::RiskAssessment;

/// Events pushed to a connected client while a chat message is processed.
///
/// Within one run they are emitted in this order:
/// `MessageSaved`, `TitleUpdated`?, `AssistantTyping(true)`, `EmergencyDetected`?,
/// `AssistantTyping(false)`, then `AssistantMessage` or `Error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ChatEvent {
    #[serde(rename = "message_saved")]
    MessageSaved {
        conversation_id: ConversationId,
        message_id: MessageId,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "conversation_title_updated")]
    TitleUpdated {
        conversation_id: ConversationId,
        title: String,
    },

    #[serde(rename = "assistant_typing")]
    AssistantTyping {
        conversation_id: ConversationId,
        is_typing: bool,
    },

    #[serde(rename = "emergency_detected")]
    EmergencyDetected {
        conversation_id: ConversationId,
        assessment: RiskAssessment,
    },

    #[serde(rename = "assistant_message")]
    AssistantMessage {
        conversation_id: ConversationId,
        message_id: MessageId,
        message: String,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        emergency_context: Option<RiskAssessment>,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
        message: String,
    },
}

impl ChatEvent {
    /// Wire name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageSaved { .. } => "message_saved",
            Self::TitleUpdated { .. } => "conversation_title_updated",
            Self::AssistantTyping { .. } => "assistant_typing",
            Self::EmergencyDetected { .. } => "emergency_detected",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::Error { .. } => "error",
        }
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::MessageSaved { conversation_id, .. }
            | Self::TitleUpdated { conversation_id, .. }
            | Self::AssistantTyping { conversation_id, .. }
            | Self::EmergencyDetected { conversation_id, .. }
            | Self::AssistantMessage { conversation_id, .. } => Some(conversation_id),
            Self::Error { conversation_id, .. } => conversation_id.as_ref(),
        }
    }

    pub fn error(conversation_id: Option<ConversationId>, message: impl Into<String>) -> Self {
        Self::Error {
            conversation_id,
            message: message.into(),
        }
    }
}
