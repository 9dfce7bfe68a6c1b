use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::zeroize::Zeroize;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const PRIMARY_ITERATIONS: u32 = 100_000;
pub const PIN_ITERATIONS: u32 = 150_000;

/// A 256-bit symmetric key. Zeroized on drop and never printed.
#[derive(Clone)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Generate a fresh hex-encoded salt.
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// PBKDF2-HMAC-SHA256 over `material`.
///
/// The salt is used as its textual (hex) form, so keys stay compatible with
/// salts persisted by earlier deployments.
pub fn derive_key(material: &[u8], salt: &str, iterations: u32) -> Result<DerivedKey, CryptoError> {
    if iterations == 0 {
        return Err(CryptoError::InvalidIterations);
    }
    if salt.is_empty() || hex::decode(salt).is_err() {
        return Err(CryptoError::InvalidSalt);
    }

    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(material, salt.as_bytes(), iterations, &mut out);
    let key = DerivedKey(out);
    out.zeroize();
    Ok(key)
}

/// One-way SHA-256 of `data || salt`, hex-encoded. Used where an identifier
/// must be recorded without being recoverable.
pub fn hash_identifier(data: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}
