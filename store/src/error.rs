/// Errors surfaced by the backing store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Unique-key conflict, e.g. a second job for the same
    /// `(user, name, sync_type)`.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The requested row does not exist (or is soft-deleted).
    #[error("not found: {0}")]
    NotFound(String),

    /// A field failed validation before it reached the database.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The mutation conflicts with the row's current state, e.g. enqueuing
    /// a task while one is already open.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A JSON column did not round-trip.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Anything the database driver reports.
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = e {
            if db.is_unique_violation() {
                return StoreError::DuplicateKey(db.message().to_string());
            }
        }
        if matches!(e, sqlx::Error::RowNotFound) {
            return StoreError::NotFound("row not found".to_string());
        }
        StoreError::Sqlx(e)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
