//! Error types for model coordination and remote generation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required setting (API key, repository owner, ...) is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The local model could not be fetched or instantiated.
    #[error("Model load error: {0}")]
    Load(String),

    #[error("Inference error: {0}")]
    Inference(String),

    /// Another inference is already running on this loader.
    #[error("Model busy: {0}")]
    Busy(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Errors that make the local model unusable for the rest of the session.
    pub fn is_local_model_failure(&self) -> bool {
        matches!(self, Error::Load(_) | Error::Inference(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Error::Api {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Error::Network(err.to_string()),
        }
    }
}
