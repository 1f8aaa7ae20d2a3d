//! Record store error taxonomy

use sqlx::error::ErrorKind;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage failures surfaced by the record store and the transfer engine.
///
/// Callers only need to tell `NotFound` and `Constraint` apart from the
/// rest; every other variant is an internal failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("deadlock detected: {0}")]
    Deadlock(String),

    #[error("lock wait timeout: {0}")]
    LockTimeout(String),

    #[error("transaction timed out")]
    Timeout,

    #[error("tx err: {tx}, rollback err: {rollback}")]
    Rollback {
        tx: Box<StoreError>,
        rollback: Box<StoreError>,
    },

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound => "NOT_FOUND",
            StoreError::Constraint(_) => "CONSTRAINT_VIOLATION",
            StoreError::Connection(_) => "CONNECTION_ERROR",
            StoreError::Deadlock(_) => "DEADLOCK",
            StoreError::LockTimeout(_) => "LOCK_TIMEOUT",
            StoreError::Timeout => "TIMEOUT",
            StoreError::Rollback { .. } => "ROLLBACK_FAILED",
            StoreError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// The error that aborted the transaction, looking through a failed rollback
    pub fn root(&self) -> &StoreError {
        match self {
            StoreError::Rollback { tx, .. } => tx.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), StoreError::NotFound)
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self.root(), StoreError::Constraint(_))
    }
}

// SQLSTATE codes without a dedicated sqlx ErrorKind
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.kind() {
                    ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation => {
                        let name = db_err.constraint().unwrap_or(message.as_str());
                        StoreError::Constraint(name.to_string())
                    }
                    _ => match db_err.code().as_deref() {
                        Some(NUMERIC_VALUE_OUT_OF_RANGE) => StoreError::Constraint(message),
                        Some(DEADLOCK_DETECTED) => StoreError::Deadlock(message),
                        Some(LOCK_NOT_AVAILABLE) => StoreError::LockTimeout(message),
                        _ => StoreError::Database(message),
                    },
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(e.to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        assert_eq!(StoreError::from(sqlx::Error::RowNotFound), StoreError::NotFound);
    }

    #[test]
    fn test_sqlx_pool_errors_map_to_connection() {
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Connection(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolClosed),
            StoreError::Connection(_)
        ));
    }

    #[test]
    fn test_rollback_failure_keeps_root_cause() {
        let err = StoreError::Rollback {
            tx: Box::new(StoreError::NotFound),
            rollback: Box::new(StoreError::Connection("reset".into())),
        };
        assert!(err.is_not_found());
        assert_eq!(err.code(), "ROLLBACK_FAILED");
        assert_eq!(
            err.to_string(),
            "tx err: record not found, rollback err: connection error: reset"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(StoreError::Constraint("x".into()).code(), "CONSTRAINT_VIOLATION");
        assert_eq!(StoreError::Timeout.code(), "TIMEOUT");
        assert!(StoreError::Constraint("x".into()).is_constraint());
        assert!(!StoreError::Timeout.is_constraint());
    }
}
