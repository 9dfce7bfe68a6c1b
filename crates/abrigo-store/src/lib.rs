//! SQLite persistence for users, conversations, sealed messages, goals,
//! check-ins, pattern tags and account records, plus an in-process cache.
//!
//! Repositories are synchronous and cheap to construct: each wraps a clone of
//! the shared [`Database`] handle.

pub mod account;
pub mod cache;
pub mod checkins;
pub mod conversations;
pub mod database;
pub mod error;
pub mod goals;
pub mod messages;
pub mod patterns;
pub mod row_helpers;
pub mod schema;
pub mod users;

pub use account::{AccountExport, AccountRepo};
pub use cache::MemoryCache;
pub use checkins::{CheckinRepo, CheckinRow};
pub use conversations::{ConversationRepo, ConversationRow, DEFAULT_TITLE};
pub use database::Database;
pub use error::StoreError;
pub use goals::{GoalRepo, GoalRow, GoalStatus, GoalUpdate, NewGoal};
pub use messages::{MessageRepo, MessageRow};
pub use patterns::PatternRepo;
pub use users::{Theme, UserProfile, UserRepo, UserRow};
