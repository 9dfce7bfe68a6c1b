pub mod cache;
pub mod completion;
pub mod errors;
pub mod events;
pub mod identity;
pub mod ids;
pub mod messages;
pub mod risk;
pub mod security;
