use smartevents_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Work references state that should not exist, e.g. a work item whose
    /// managed resource is gone. Indicates a scheduling bug.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkError {
    /// Errors raised by downstream services. Workers absorb these and retry
    /// on the next dispatch.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkError::Provider(err) => err.is_transient(),
            #[cfg(feature = "database")]
            WorkError::Database(_) => true,
            WorkError::Conflict(_) => true,
            _ => false,
        }
    }
}

/// Failure reported by a topic or connector-management client.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{service} returned {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("invalid provider configuration: {0}")]
    Configuration(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Status { status, .. } => {
                *status == 429 || *status >= 500
            }
            ProviderError::Rejected(_) | ProviderError::Configuration(_) => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkError>;
