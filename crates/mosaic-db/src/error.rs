use mosaic_core::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Asset {0} not found")]
    AssetNotFound(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl DbError {
    /// Connection and pool failures are worth retrying; constraint and
    /// lookup failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            DbError::Sqlx(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ) || e
                .as_database_error()
                .and_then(|db| db.code())
                .is_some_and(|code| is_transient_sqlstate(&code)),
            DbError::AssetNotFound(_) | DbError::Conflict(_) => false,
        }
    }
}

/// Serialization failures and deadlocks abort the transaction but succeed on retry.
fn is_transient_sqlstate(code: &str) -> bool {
    matches!(code, "40001" | "40P01" | "55P03")
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::AssetNotFound(id) => AppError::NotFound(format!("Asset {} not found", id)),
            DbError::Conflict(msg) => AppError::InvalidInput(msg),
            DbError::Sqlx(e) => AppError::Database(e),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
