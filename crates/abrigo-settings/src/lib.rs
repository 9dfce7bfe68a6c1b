//! Configuration for the abrigo server.
//!
//! Non-secret settings come from three layers, lowest priority first:
//! compiled defaults ([`AbrigoSettings::default()`]), `~/.abrigo/settings.json`
//! deep-merged over them, and `ABRIGO_*` environment variables. Secrets
//! ([`Secrets`]) are read from the environment only.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod secrets;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{abrigo_home, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use secrets::{JwtSecret, Secrets};
pub use types::*;
