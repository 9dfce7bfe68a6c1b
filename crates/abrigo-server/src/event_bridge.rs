use std::sync::Arc;

use async_trait::async_trait;

use abrigo_core::events::ChatEvent;
use abrigo_engine::EventSink;

use crate::client::{ClientId, ClientRegistry};

/// Forwards pipeline events to one connection's send queue.
///
/// Once the client disconnects, emits become no-ops and the pipeline run
/// carries on to completion.
pub struct ClientSink {
    registry: Arc<ClientRegistry>,
    client_id: ClientId,
}

impl ClientSink {
    pub fn new(registry: Arc<ClientRegistry>, client_id: ClientId) -> Self {
        Self { registry, client_id }
    }
}

#[async_trait]
impl EventSink for ClientSink {
    async fn emit(&self, event: ChatEvent) {
        let Some(json) = serialize_event(&event) else {
            tracing::warn!(event_type = event.kind(), "failed to serialize event");
            return;
        };
        if !self.registry.send_to(&self.client_id, json) {
            tracing::debug!(client_id = %self.client_id, event_type = event.kind(), "event not delivered");
        }
    }
}

pub fn serialize_event(event: &ChatEvent) -> Option<String> {
    serde_json::to_string(event).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use abrigo_core::ids::{ConversationId, UserId};

    fn typing() -> ChatEvent {
        ChatEvent::AssistantTyping {
            conversation_id: ConversationId::from_raw("conv_1"),
            is_typing: true,
        }
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serialize_event(&typing()).unwrap();
        assert!(json.contains("\"type\":\"assistant_typing\""));
        assert!(json.contains("\"isTyping\":true"));
    }

    #[tokio::test]
    async fn forwards_to_owning_client_only() {
        let registry = Arc::new(ClientRegistry::new(8));
        let (mine, mut rx) = registry.register(UserId::from_raw("user_a"));
        let (_other, mut other_rx) = registry.register(UserId::from_raw("user_a"));

        ClientSink::new(Arc::clone(&registry), mine).emit(typing()).await;

        assert!(rx.recv().await.unwrap().contains("assistant_typing"));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn emit_after_disconnect_is_noop() {
        let registry = Arc::new(ClientRegistry::new(8));
        let (id, _rx) = registry.register(UserId::from_raw("user_a"));
        registry.unregister(&id);

        ClientSink::new(Arc::clone(&registry), id).emit(typing()).await;
        assert_eq!(registry.count(), 0);
    }
}
