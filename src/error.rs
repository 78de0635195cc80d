use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Errors surfaced by the dedup store and its helpers.
#[derive(Debug, Error)]
pub enum AppError {
    /// The store was never provisioned because no notification destination is configured.
    #[error("deduplication store is not configured")]
    NotConfigured,

    #[error("malformed identity hash: {0}")]
    MalformedKey(String),

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("redis error: {0}")]
    Redis(redis::RedisError),

    #[error("dynamodb error: {message}")]
    DynamoDb { message: String, retryable: bool },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigurationAbsent,
    Transient,
    MalformedKey,
    Permanent,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotConfigured => ErrorKind::ConfigurationAbsent,
            AppError::MalformedKey(_) => ErrorKind::MalformedKey,
            AppError::Transient(_) | AppError::Timeout(_) => ErrorKind::Transient,
            AppError::Database(e) => {
                if matches!(
                    e,
                    sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
                ) {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Permanent
                }
            }
            AppError::Redis(e) => {
                if e.is_timeout()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_io_error()
                {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Permanent
                }
            }
            AppError::DynamoDb { retryable, .. } => {
                if *retryable {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Permanent
                }
            }
            AppError::Config(_) | AppError::Validation(_) | AppError::Internal(_) => {
                ErrorKind::Permanent
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_not_configured(&self) -> bool {
        self.kind() == ErrorKind::ConfigurationAbsent
    }
}
