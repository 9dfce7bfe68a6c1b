use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
    /// A secret the server cannot start without is not set.
    #[error("missing required secret: {0}")]
    MissingSecret(&'static str),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
