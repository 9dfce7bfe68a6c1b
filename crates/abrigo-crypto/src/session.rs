use std::sync::OnceLock;

use abrigo_core::security::MasterSecret;
use secrecy::zeroize::Zeroizing;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::envelope::{self, EncryptedPayload};
use crate::error::CryptoError;
use crate::kdf::{self, DerivedKey, PIN_ITERATIONS, PRIMARY_ITERATIONS};

/// Which key to seal or open with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeySlot {
    #[default]
    Primary,
    /// PIN-derived key. Falls back to the primary key when no PIN is set.
    Secondary,
}

/// Per-user encryption context for one operation or one pipeline run.
///
/// The primary key is derived from `subject || master secret` the first time
/// it is needed and dropped with the session. Sessions are never shared
/// across users.
pub struct EncryptionSession {
    subject: String,
    salt: String,
    master: MasterSecret,
    iterations: u32,
    primary: OnceLock<DerivedKey>,
    secondary: Option<DerivedKey>,
}

impl EncryptionSession {
    pub fn new(subject: impl Into<String>, salt: impl Into<String>, master: MasterSecret) -> Self {
        Self {
            subject: subject.into(),
            salt: salt.into(),
            master,
            iterations: PRIMARY_ITERATIONS,
            primary: OnceLock::new(),
            secondary: None,
        }
    }

    /// Override the primary iteration count (tests and benchmarks only).
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Build a session and derive its primary key on the blocking pool.
    pub async fn open(
        subject: impl Into<String>,
        salt: impl Into<String>,
        master: MasterSecret,
    ) -> Result<Self, CryptoError> {
        Self::new(subject, salt, master).prepared().await
    }

    /// Derive the primary key off the async executor, if not done yet.
    pub async fn prepared(self) -> Result<Self, CryptoError> {
        if self.primary.get().is_some() {
            return Ok(self);
        }
        tokio::task::spawn_blocking(move || {
            self.primary_key()?;
            Ok(self)
        })
        .await
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?
    }

    fn primary_key(&self) -> Result<&DerivedKey, CryptoError> {
        if let Some(key) = self.primary.get() {
            return Ok(key);
        }
        let mut material = Zeroizing::new(self.subject.as_bytes().to_vec());
        material.extend_from_slice(self.master.0.expose_secret().as_bytes());
        let key = kdf::derive_key(&material, &self.salt, self.iterations)?;
        debug!("primary key derived");
        Ok(self.primary.get_or_init(|| key))
    }

    /// Derive the secondary key from a PIN. An empty PIN clears it.
    pub fn set_pin(&mut self, pin: &str) -> Result<(), CryptoError> {
        self.secondary = if pin.is_empty() {
            None
        } else {
            Some(kdf::derive_key(pin.as_bytes(), &self.salt, PIN_ITERATIONS)?)
        };
        Ok(())
    }

    pub fn has_pin(&self) -> bool {
        self.secondary.is_some()
    }

    fn key_for(&self, slot: KeySlot) -> Result<&DerivedKey, CryptoError> {
        match (slot, &self.secondary) {
            (KeySlot::Secondary, Some(key)) => Ok(key),
            _ => self.primary_key(),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedPayload, CryptoError> {
        self.encrypt_with(plaintext, KeySlot::Primary)
    }

    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<String, CryptoError> {
        self.decrypt_with(payload, KeySlot::Primary)
    }

    pub fn encrypt_with(&self, plaintext: &str, slot: KeySlot) -> Result<EncryptedPayload, CryptoError> {
        envelope::encrypt(plaintext, self.key_for(slot)?)
    }

    pub fn decrypt_with(&self, payload: &EncryptedPayload, slot: KeySlot) -> Result<String, CryptoError> {
        envelope::decrypt(payload, self.key_for(slot)?)
    }

    /// Decrypt, substituting the visible placeholder on failure.
    pub fn decrypt_or_placeholder(&self, payload: &EncryptedPayload) -> String {
        self.decrypt(payload)
            .unwrap_or_else(|_| crate::DECRYPT_PLACEHOLDER.to_string())
    }
}

impl std::fmt::Debug for EncryptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionSession")
            .field("primary_ready", &self.primary.get().is_some())
            .field("has_pin", &self.secondary.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::generate_salt;

    const FAST: u32 = 1_000;

    fn session(subject: &str, salt: &str) -> EncryptionSession {
        EncryptionSession::new(subject, salt, MasterSecret::from("master")).with_iterations(FAST)
    }

    #[test]
    fn lazy_primary_roundtrip() {
        let s = session("uid-1", &generate_salt());
        let sealed = s.encrypt("olá").unwrap();
        assert_eq!(s.decrypt(&sealed).unwrap(), "olá");
    }

    #[test]
    fn same_identity_same_key_across_sessions() {
        let salt = generate_salt();
        let sealed = session("uid-1", &salt).encrypt("persisted").unwrap();
        assert_eq!(session("uid-1", &salt).decrypt(&sealed).unwrap(), "persisted");
    }

    #[test]
    fn other_user_cannot_decrypt() {
        let salt = generate_salt();
        let sealed = session("uid-1", &salt).encrypt("private").unwrap();
        assert!(session("uid-2", &salt).decrypt(&sealed).is_err());
    }

    #[test]
    fn other_master_secret_cannot_decrypt() {
        let salt = generate_salt();
        let sealed = session("uid-1", &salt).encrypt("private").unwrap();
        let other = EncryptionSession::new("uid-1", salt.as_str(), MasterSecret::from("rotated"))
            .with_iterations(FAST);
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn secondary_falls_back_to_primary_without_pin() {
        let s = session("uid-1", &generate_salt());
        assert!(!s.has_pin());
        let sealed = s.encrypt_with("x", KeySlot::Secondary).unwrap();
        assert_eq!(s.decrypt(&sealed).unwrap(), "x");
    }

    #[test]
    fn pin_key_is_distinct() {
        let mut s = session("uid-1", &generate_salt());
        s.set_pin("4321").unwrap();
        assert!(s.has_pin());
        let sealed = s.encrypt_with("pin-protected", KeySlot::Secondary).unwrap();
        assert!(s.decrypt(&sealed).is_err());
        assert_eq!(s.decrypt_with(&sealed, KeySlot::Secondary).unwrap(), "pin-protected");

        s.set_pin("").unwrap();
        assert!(!s.has_pin());
    }

    #[test]
    fn placeholder_on_failure() {
        let s = session("uid-1", &generate_salt());
        let mut sealed = s.encrypt("x").unwrap();
        sealed.auth_tag = "00".repeat(16);
        assert_eq!(s.decrypt_or_placeholder(&sealed), crate::DECRYPT_PLACEHOLDER);
    }

    #[test]
    fn invalid_salt_surfaces_on_use() {
        let s = session("uid-1", "");
        assert!(matches!(s.encrypt("x"), Err(CryptoError::InvalidSalt)));
    }

    #[tokio::test]
    async fn prepared_derives_off_executor() {
        let salt = generate_salt();
        let s = session("uid-1", &salt).prepared().await.unwrap();
        let sealed = s.encrypt("async").unwrap();
        assert_eq!(session("uid-1", &salt).decrypt(&sealed).unwrap(), "async");
    }

    #[test]
    fn debug_hides_material() {
        let s = session("uid-secret", &generate_salt());
        let debug = format!("{s:?}");
        assert!(!debug.contains("uid-secret"));
        assert!(!debug.contains("master"));
    }
}
