use thiserror::Error;

/// wagertally error types
#[derive(Error, Debug)]
pub enum TallyError {
    /// Blank subject or non-finite amount
    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    /// Persistence read/write failed or timed out
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Point lookup for a subject with no record
    #[error("subject not found: {0}")]
    NotFound(String),

    /// Stored record could not be decoded
    #[error("corrupt record for {subject}: {reason}")]
    Corrupt { subject: String, reason: String },

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Failed to parse history or config input
    #[error("parse error: {0}")]
    Parse(String),

    /// File I/O error outside the store
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TallyError {
    /// Whether the caller may retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TallyError::StorageUnavailable(_))
    }
}

impl From<rusqlite::Error> for TallyError {
    fn from(err: rusqlite::Error) -> Self {
        TallyError::StorageUnavailable(format!("sqlite: {}", err))
    }
}

/// Result type alias for wagertally
pub type Result<T> = std::result::Result<T, TallyError>;
