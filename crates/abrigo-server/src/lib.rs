//! # abrigo-server
//!
//! Authenticated WebSocket transport. Each connection gets a sequential RPC
//! processor; `chat.send` streams pipeline events back over the same socket.

pub mod auth;
pub mod client;
pub mod event_bridge;
pub mod handlers;
pub mod rpc;
pub mod server;

pub use auth::JwtVerifier;
pub use handlers::HandlerState;
pub use server::{start, ServerConfig, ServerHandle};
