use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use abrigo_core::ids::UserId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An authenticated WebSocket connection.
pub struct Client {
    pub id: ClientId,
    pub user_id: UserId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Client {
    fn new(id: ClientId, user_id: UserId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            user_id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
    heartbeat: Duration,
    client_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
            heartbeat: HEARTBEAT_INTERVAL,
            client_timeout: CLIENT_TIMEOUT,
        }
    }

    /// Ping every `heartbeat`; drop clients silent for longer than `timeout`.
    pub fn with_liveness(mut self, heartbeat: Duration, timeout: Duration) -> Self {
        self.heartbeat = heartbeat;
        self.client_timeout = timeout;
        self
    }

    /// Register a connection for `user_id`. The receiver feeds the socket writer.
    pub fn register(&self, user_id: UserId) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients.insert(id.clone(), Arc::new(Client::new(id.clone(), user_id, tx)));
        (id, rx)
    }

    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    pub fn get(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Queue a message for one client. Returns false when the client is gone
    /// or its queue is full.
    pub fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        let Some(client) = self.get(client_id) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(client_id = %client_id, msg_len = msg.len(), "send queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Connections currently open for a user.
    pub fn clients_for_user(&self, user_id: &UserId) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|entry| &entry.value().user_id == user_id && entry.value().is_connected())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Remove clients that haven't answered a ping within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive(self.client_timeout))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        dead.len()
    }
}

/// Drive a WebSocket: the writer drains the client's queue and pings, the
/// reader forwards text frames to `on_message`. Returns when either side ends.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let heartbeat = registry.heartbeat;
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "sent ping");
                }
            }
        }
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if on_message.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.get(&reader_cid) {
                        client.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&client_id);
    tracing::info!(client_id = %client_id, "client disconnected");
}

/// Periodically drop clients that stopped answering pings.
pub fn start_cleanup_task(registry: Arc<ClientRegistry>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed, "dead client cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(raw: &str) -> UserId {
        UserId::from_raw(raw)
    }

    #[test]
    fn client_ids_unique() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
        assert!(a.0.starts_with("client_"));
    }

    #[test]
    fn register_and_unregister() {
        let registry = ClientRegistry::new(32);
        let (id1, _rx1) = registry.register(user("user_a"));
        let (id2, _rx2) = registry.register(user("user_a"));
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.clients_for_user(&user("user_a")).len(), 2);

        registry.unregister(&id1);
        assert_eq!(registry.count(), 1);
        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
        assert!(registry.clients_for_user(&user("user_a")).is_empty());
    }

    #[test]
    fn clients_scoped_by_user() {
        let registry = ClientRegistry::new(32);
        let (mine, _rx1) = registry.register(user("user_a"));
        let (_theirs, _rx2) = registry.register(user("user_b"));
        assert_eq!(registry.clients_for_user(&user("user_a")), [mine]);
    }

    #[tokio::test]
    async fn send_to_specific_client() {
        let registry = ClientRegistry::new(32);
        let (id, mut rx) = registry.register(user("user_a"));
        assert!(registry.send_to(&id, "hello".into()));
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn send_to_unknown_or_closed_client() {
        let registry = ClientRegistry::new(32);
        assert!(!registry.send_to(&ClientId::new(), "x".into()));

        let (id, rx) = registry.register(user("user_a"));
        drop(rx);
        assert!(!registry.send_to(&id, "x".into()));
    }

    #[test]
    fn full_queue_drops() {
        let registry = ClientRegistry::new(2);
        let (id, _rx) = registry.register(user("user_a"));
        assert!(registry.send_to(&id, "1".into()));
        assert!(registry.send_to(&id, "2".into()));
        assert!(!registry.send_to(&id, "3".into()));
    }

    #[test]
    fn liveness_follows_configured_timeout() {
        let registry = ClientRegistry::new(4).with_liveness(Duration::from_secs(5), Duration::from_secs(10));
        let (id, _rx) = registry.register(user("user_a"));
        let client = registry.get(&id).unwrap();
        assert!(client.is_alive(Duration::from_secs(10)));
        client.last_pong.store(now_secs() - 20, Ordering::Relaxed);
        assert_eq!(registry.cleanup_dead_clients(), 1);
    }

    #[test]
    fn cleanup_removes_silent_clients() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register(user("user_a"));
        let (_alive, _rx2) = registry.register(user("user_b"));
        registry.get(&id).unwrap().last_pong.store(0, Ordering::Relaxed);

        assert_eq!(registry.cleanup_dead_clients(), 1);
        assert_eq!(registry.count(), 1);
        assert!(registry.get(&id).is_none());
    }
}
