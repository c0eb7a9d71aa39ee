use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Auth,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Lease store unavailable: {0}")]
    CoordinationUnavailable(String),

    #[error("Transient source error: {0}")]
    SourceTransient(String),

    #[error("Terminal source error (status {status}): {body}")]
    SourceTerminal { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Storage(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Run time budget exceeded")]
    Timeout,
}

impl AppError {
    /// Constraint and schema violations are bug-class; everything else the
    /// warehouse returns is treated as retryable.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.constraint().is_some() => {
                AppError::Integrity(err.to_string())
            }
            sqlx::Error::RowNotFound => AppError::NotFound("row".to_string()),
            _ => AppError::Storage(err.to_string()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::SourceTransient(_) | AppError::Storage(_))
    }
}

impl From<tokio::io::Error> for AppError {
    fn from(err: tokio::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::from_sqlx(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::SourceTransient(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

// Alias for convenience
pub type Error = AppError;
