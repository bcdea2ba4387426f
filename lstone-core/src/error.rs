use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Token not found: {0}")]
    NotFound(String),

    #[error("Allocation deadline exceeded after {attempts} attempts (budget {budget:?})")]
    DeadlineExceeded { attempts: u64, budget: Duration },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Random source failure: {0}")]
    RandomSource(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns a stable error code for this error variant.
    /// These codes are stable and can be used by clients for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Error::Sqlite(_) => "SQLITE_ERROR",
            #[cfg(feature = "redis")]
            Error::Redis(_) => "REDIS_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::RandomSource(_) => "RANDOM_SOURCE",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if the caller may reasonably try the same request later.
    ///
    /// Only deadline exhaustion qualifies: the store is saturated, not broken.
    /// Infrastructure faults are fatal to the request and client-input errors
    /// will fail again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::DeadlineExceeded { .. })
    }

    /// Returns true if this error reports a broken environment rather than a
    /// bad request or a saturated keyspace.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Sqlite(_) => true,
            #[cfg(feature = "redis")]
            Error::Redis(_) => true,
            Error::Serialization(_) => true,
            Error::RandomSource(_) => true,
            Error::InvalidConfig(_) => true,
            Error::Internal(_) => true,

            Error::InvalidArgument(_) => false,
            Error::NotFound(_) => false,
            Error::DeadlineExceeded { .. } => false,
        }
    }

    /// Adds context to an error by wrapping it in an Internal error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use lstone_core::Error;
    ///
    /// fn open_store() -> Result<(), Error> {
    ///     Err(Error::InvalidConfig("missing path".to_string()))
    /// }
    ///
    /// fn start() -> Result<(), Error> {
    ///     open_store().map_err(|e| e.with_context("failed to start sweeper"))
    /// }
    /// ```
    pub fn with_context(self, context: &str) -> Error {
        Error::Internal(format!("{}: {}", context, self))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
