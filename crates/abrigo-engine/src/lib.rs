//! # abrigo-engine
//!
//! The chat message pipeline and the pieces it is built from.
//!
//! - **Safety**: keyword scan plus classifier call producing a risk assessment
//! - **Context**: goals, patterns, risk and last check-in for the system prompt
//! - **Tier**: complexity scoring and model tier selection
//! - **Pipeline**: validate → persist → classify → reply → persist, emitting
//!   events to an [`EventSink`]
//!
//! ## Crate Position
//!
//! Depends on: abrigo-core, abrigo-crypto, abrigo-store.
//! Depended on by: abrigo-server.

#![deny(unsafe_code)]

pub mod context;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod prompt;
pub mod resources;
pub mod safety;
pub mod sink;
pub mod tier;

pub use context::{ContextAssembler, UserContext};
pub use error::{PipelineError, GENERIC_FAILURE};
pub use keys::KeyService;
pub use pipeline::{ChatMessage, ChatOutcome, MessagePipeline, PipelineConfig, Requester};
pub use safety::RiskClassifier;
pub use sink::{EventSink, RecordingSink};
