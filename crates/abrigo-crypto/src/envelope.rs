use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::kdf::DerivedKey;

pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

/// AES-256-GCM with a 128-bit IV.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Sealed text. All three fields are hex and must travel together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
}

fn cipher(key: &DerivedKey) -> Result<Aes256Gcm16, CryptoError> {
    Aes256Gcm16::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::InvalidKey)
}

/// Seal `plaintext` under `key` with a fresh random IV.
pub fn encrypt(plaintext: &str, key: &DerivedKey) -> Result<EncryptedPayload, CryptoError> {
    let cipher = cipher(key)?;
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut buffer = plaintext.as_bytes().to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(EncryptedPayload {
        ciphertext: hex::encode(&buffer),
        iv: hex::encode(iv),
        auth_tag: hex::encode(tag),
    })
}

/// Open a payload. Fails closed on any tampering or malformed field.
pub fn decrypt(payload: &EncryptedPayload, key: &DerivedKey) -> Result<String, CryptoError> {
    let iv = hex::decode(&payload.iv).map_err(|_| CryptoError::MalformedPayload("iv"))?;
    if iv.len() != IV_LEN {
        return Err(CryptoError::MalformedPayload("iv"));
    }
    let tag = hex::decode(&payload.auth_tag).map_err(|_| CryptoError::MalformedPayload("auth_tag"))?;
    if tag.len() != TAG_LEN {
        return Err(CryptoError::MalformedPayload("auth_tag"));
    }
    let mut buffer =
        hex::decode(&payload.ciphertext).map_err(|_| CryptoError::MalformedPayload("ciphertext"))?;

    cipher(key)?
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&iv),
            b"",
            &mut buffer,
            Tag::from_slice(&tag),
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;

    String::from_utf8(buffer).map_err(|_| CryptoError::InvalidUtf8)
}
