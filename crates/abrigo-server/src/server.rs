use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use abrigo_core::identity::IdentityVerifier;
use abrigo_engine::Requester;
use abrigo_store::UserRepo;

use crate::auth::extract_token;
use crate::client::{self, ClientId, ClientRegistry};
use crate::event_bridge::ClientSink;
use crate::handlers::{self, HandlerState};
use crate::rpc::{RpcRequest, RpcResponse};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    /// Inbound messages buffered per connection while one is being processed.
    pub inbound_queue: usize,
    pub heartbeat: Duration,
    /// Connections silent for longer than this are dropped.
    pub client_timeout: Duration,
    /// Allowed CORS origin. Any origin when unset.
    pub frontend_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_send_queue: 256,
            inbound_queue: 64,
            heartbeat: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            frontend_url: None,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handlers: Arc<HandlerState>,
    pub registry: Arc<ClientRegistry>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub inbound_queue: usize,
}

pub fn build_router(state: AppState, frontend_url: Option<&str>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(cors_layer(frontend_url))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    let Some(origin) = frontend_url else {
        return CorsLayer::permissive();
    };
    match origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => {
            warn!(origin, "invalid frontend origin, allowing any");
            CorsLayer::permissive()
        }
    }
}

/// Bind and serve. Returns a handle that keeps background tasks alive.
pub async fn start(
    config: ServerConfig,
    handler_state: HandlerState,
    verifier: Arc<dyn IdentityVerifier>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(
        ClientRegistry::new(config.max_send_queue).with_liveness(config.heartbeat, config.client_timeout),
    );
    let cleanup = client::start_cleanup_task(Arc::clone(&registry), Duration::from_secs(60));

    let state = AppState {
        handlers: Arc::new(handler_state),
        registry,
        verifier,
        inbound_queue: config.inbound_queue,
    };
    let router = build_router(state, config.frontend_url.as_deref());

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "abrigo server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
        _cleanup: cleanup,
    })
}

pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Wait until the server task ends.
    pub async fn wait(self) {
        let _ = self.server.await;
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Verify the bearer token and resolve the caller's account, creating it on
/// first sight.
pub async fn authenticate(state: &AppState, headers: &HeaderMap, query_token: Option<&str>) -> Result<Requester, StatusCode> {
    let token = extract_token(headers, query_token).ok_or(StatusCode::UNAUTHORIZED)?;
    let identity = state.verifier.verify(&token).await.map_err(|e| {
        warn!(error = %e, "websocket authentication failed");
        StatusCode::UNAUTHORIZED
    })?;

    let users = UserRepo::new(state.handlers.db.clone());
    let user = users
        .get_or_create(&identity.subject, identity.email.as_deref())
        .map_err(|e| {
            tracing::error!(error = %e, "user lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    if let Err(e) = users.touch_login(&user.id) {
        debug!(error = %e, "login timestamp not updated");
    }
    Ok(Requester {
        user_id: user.id,
        subject: identity.subject,
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    match authenticate(&state, &headers, query.token.as_deref()).await {
        Ok(caller) => ws.on_upgrade(move |socket| handle_socket(socket, state, caller)),
        Err(status) => status.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, caller: Requester) {
    let (client_id, rx) = state.registry.register(caller.user_id.clone());
    info!(
        client_id = %client_id,
        user_id = %caller.user_id,
        open = state.registry.clients_for_user(&caller.user_id).len(),
        "client connected"
    );

    let (inbound_tx, inbound_rx) = mpsc::channel(state.inbound_queue);
    tokio::spawn(process_messages(
        inbound_rx,
        client_id.clone(),
        caller,
        Arc::clone(&state.handlers),
        Arc::clone(&state.registry),
    ));

    client::handle_ws_connection(socket, client_id, rx, state.registry, inbound_tx).await;
}

/// One connection's messages, strictly in arrival order. Runs to the end of
/// any in-flight request even after the socket closes.
async fn process_messages(
    mut rx: mpsc::Receiver<String>,
    client_id: ClientId,
    caller: Requester,
    handlers: Arc<HandlerState>,
    registry: Arc<ClientRegistry>,
) {
    let sink = ClientSink::new(Arc::clone(&registry), client_id.clone());
    while let Some(raw) = rx.recv().await {
        let response = match serde_json::from_str::<RpcRequest>(&raw) {
            Ok(request) => {
                let params = request.params.unwrap_or(Value::Null);
                handlers::dispatch(&handlers, &caller, &request.method, &params, request.id, &sink).await
            }
            Err(_) => RpcResponse::parse_error(),
        };
        if let Ok(json) = serde_json::to_string(&response) {
            registry.send_to(&client_id, json);
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = handlers::health(&state.handlers);
    let status = if body["status"] == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
