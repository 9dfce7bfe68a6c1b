use std::time::Duration;

use abrigo_core::errors::CompletionError;
use abrigo_crypto::CryptoError;
use abrigo_store::StoreError;

/// Shown to the user for any failure after their message was accepted.
pub const GENERIC_FAILURE: &str = "Erro ao processar mensagem. Por favor, tente novamente.";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or owned by someone else. The two are never distinguished.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::InvalidInput(why) => Self::Validation(why),
            other => Self::Store(other),
        }
    }
}

impl PipelineError {
    /// Rejected before any side effect.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }

    /// Message safe to show the client. Internal detail never leaves the server.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Dados incompletos",
            Self::NotFound(_) => "Conversa não encontrada",
            _ => GENERIC_FAILURE,
        }
    }
}
