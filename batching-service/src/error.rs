use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchingError {
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Concurrency conflict: {0}")]
    Conflict(String),

    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Notification error: {0}")]
    Notification(String),
}

impl BatchingError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Whether the failed unit of work may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

const BATCH_IDENTIFIER_CONSTRAINT: &str = "batches_batch_identifier_key";

/// SQLSTATE 40001 (serialization_failure), 40P01 (deadlock_detected) and a
/// unique violation on the batch identifier map to Conflict.
fn is_transient(code: Option<&str>, constraint: Option<&str>) -> bool {
    match code {
        Some("40001") | Some("40P01") => true,
        Some("23505") => constraint == Some(BATCH_IDENTIFIER_CONSTRAINT),
        _ => false,
    }
}

impl From<sqlx::Error> for BatchingError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = err {
            if is_transient(db.code().as_deref(), db.constraint()) {
                return BatchingError::Conflict(db.message().to_string());
            }
        }
        BatchingError::Database(err)
    }
}

pub type BatchingResult<T> = Result<T, BatchingError>;
