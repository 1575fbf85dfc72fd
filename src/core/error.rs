use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    #[error("Topic '{0}' has not been loaded")]
    TopicNotLoaded(String),

    #[error("Fetch of '{topic}' failed: {message}")]
    FetchFailed { topic: String, message: String },

    #[error("Commit for owner '{owner}' failed: {message}")]
    CommitFailed { owner: String, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Remote failures a presentation layer should offer a retry for.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed { .. } | Self::CommitFailed { .. } | Self::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl<T> From<std::sync::PoisonError<T>> for SyncError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
