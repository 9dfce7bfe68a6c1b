//! Per-user envelope encryption.
//!
//! Keys are derived with PBKDF2-HMAC-SHA256 from the user's stable identity
//! subject concatenated with the server master secret, salted with a random
//! per-user salt. Payloads are sealed with AES-256-GCM using a fresh 128-bit IV
//! and stored as hex-encoded (ciphertext, iv, auth tag).

pub mod envelope;
pub mod error;
pub mod kdf;
pub mod session;

pub use envelope::{decrypt, encrypt, EncryptedPayload};
pub use error::CryptoError;
pub use kdf::{derive_key, generate_salt, DerivedKey};
pub use session::{EncryptionSession, KeySlot};

/// Shown in place of a stored record that fails to decrypt.
pub const DECRYPT_PLACEHOLDER: &str = "[Erro ao descriptografar]";
