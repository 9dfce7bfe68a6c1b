#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key")]
    InvalidKey,
    #[error("invalid salt")]
    InvalidSalt,
    #[error("iteration count must be positive")]
    InvalidIterations,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("malformed payload field: {0}")]
    MalformedPayload(&'static str),
    #[error("invalid UTF-8")]
    InvalidUtf8,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}
