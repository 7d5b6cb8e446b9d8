use thiserror::Error;

/// Result type for propcache operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a capacity error
    pub fn capacity(msg: impl Into<String>) -> Self {
        Error::Capacity(msg.into())
    }

    /// Create a refresh error
    pub fn refresh(msg: impl Into<String>) -> Self {
        Error::Refresh(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a lock error
    pub fn lock(msg: impl Into<String>) -> Self {
        Error::Lock(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

/// Error type for all propcache operations.
///
/// Cache misses, stale reads and invalidated reads are *states*, not errors;
/// they never surface through this type. Errors are reserved for warming queue
/// capacity, refresh collaborator failures, misconfiguration and lock
/// poisoning.
#[derive(Error, Debug)]
pub enum Error {
    /// Warming queue is at capacity
    #[error("Capacity error: {0}")]
    Capacity(String),

    /// Refresh collaborator failed or timed out
    #[error("Refresh error: {0}")]
    Refresh(String),

    /// Configuration errors (construction-time only)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lock errors
    #[error("Lock error: {0}")]
    Lock(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
