//! Errors raised by the transactional storage layer.

use thiserror::Error;

/// Errors raised while running a transaction or walking the graph.
///
/// `NotFound` is deliberately absent: operations that may legitimately find
/// nothing return `Option`/empty collections rather than an error variant.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The underlying database aborted the transaction (deadlock, busy,
    /// constraint conflict the caller should retry).
    #[error("transaction aborted: {0}")]
    TransactionAborted(#[source] sqlx::Error),

    /// A constraint was violated on insert in a way that indicates a bug in
    /// the caller rather than a transient condition.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// A row's content could not be decoded back into the expected type.
    #[error("corrupt row: {0}")]
    Decode(String),

    /// A JSON column failed to (de)serialize.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::IntegrityViolation(db_err.message().to_owned())
            }
            _ => Error::TransactionAborted(err),
        }
    }
}
