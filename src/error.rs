pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exam is not open for attempts")]
    OutOfWindow,

    #[error("Attempt limit reached for this exam")]
    AttemptLimitExceeded,

    #[error("Attempt is already finalized")]
    AttemptAlreadyFinalized,

    #[error("Failed to persist answer drafts: {0}")]
    FlushFailed(String),

    #[error("Scoring failed: {0}")]
    ScoringFailed(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
