//! Completion providers.
//!
//! [`AnthropicCompletion`] talks to the Messages API. [`ReliableCompletion`]
//! wraps any provider with retries and a circuit breaker. [`MockCompletion`]
//! replays scripted replies for tests.

pub mod mock;
pub mod models;
pub mod provider;
pub mod reliable;

pub use mock::{MockCompletion, MockReply};
pub use models::{ModelRoster, TierModel};
pub use provider::AnthropicCompletion;
pub use reliable::{ReliableCompletion, ReliableConfig};
