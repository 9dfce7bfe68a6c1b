use async_trait::async_trait;
use parking_lot::Mutex;

use abrigo_core::events::ChatEvent;

/// Destination for pipeline events.
///
/// Emits after the receiver has gone away are silently dropped.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ChatEvent);
}

/// Collects every emitted event in order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ChatEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChatEvent> {
        self.events.lock().clone()
    }

    /// Wire names of the recorded events, with typing state spelled out.
    pub fn kinds(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| match e {
                ChatEvent::AssistantTyping { is_typing, .. } => format!("assistant_typing:{is_typing}"),
                other => other.kind().to_string(),
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: ChatEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abrigo_core::ids::ConversationId;

    #[tokio::test]
    async fn records_in_order() {
        let sink = RecordingSink::new();
        let conv = ConversationId::from_raw("conv_1");
        sink.emit(ChatEvent::AssistantTyping {
            conversation_id: conv.clone(),
            is_typing: true,
        })
        .await;
        sink.emit(ChatEvent::error(Some(conv), "falhou")).await;

        assert_eq!(sink.kinds(), ["assistant_typing:true", "error"]);
        assert_eq!(sink.events().len(), 2);
    }
}
