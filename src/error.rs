//! Error types for the loader.

use std::fmt;

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the loader.
///
/// Every error is `Clone`: a single failure may be delivered to many
/// subscribers waiting on the same key or the same batch.
///
/// Variants fall into four groups:
/// - **per-key** (`NotFound`, `KeyError`): reported by the fetch function for
///   one key; only that key's subscribers see it.
/// - **total batch failure** (`RepositoryError`, `Timeout`, `FetchPanicked`):
///   the fetch call itself failed; every subscriber of the batch sees it.
/// - **contract violation** (`BatchContract`): the fetch function broke its
///   one-outcome-per-key contract.
/// - **lifecycle** (`ScopeCancelled`, `ConfigError`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The data source has no value for the key.
    ///
    /// Per-key. Cached like a value until the key is cleared.
    NotFound(String),

    /// The data source could not resolve one specific key.
    ///
    /// Per-key. Other keys of the same batch are unaffected.
    KeyError(String),

    /// Data repository error (database, remote API, etc).
    ///
    /// Returned by the fetch function as a top-level error. Common causes:
    /// - Database connection lost
    /// - Connection refused by a remote API
    /// - Query syntax error
    ///
    /// Every subscriber of the batch receives this error. The failed keys are
    /// evicted from the cache so a later load fetches them again.
    RepositoryError(String),

    /// The fetch function exceeded its own deadline.
    ///
    /// Deadlines are owned by the fetch function; the loader treats this as a
    /// total batch failure.
    Timeout(String),

    /// The fetch function panicked while producing the batch.
    FetchPanicked(String),

    /// The fetch function returned the wrong number of outcomes.
    ///
    /// This is a programming defect in the fetch function, never a data
    /// condition. Every subscriber of the batch receives this error and the
    /// violation is logged at `error` level.
    BatchContract {
        /// Number of distinct keys passed to the fetch function
        expected: usize,
        /// Number of outcomes it returned
        found: usize,
    },

    /// The owning scope was torn down before the key settled.
    ScopeCancelled,

    /// Configuration error while building a loader.
    ///
    /// Common causes:
    /// - Building a loader outside of a tokio runtime
    ConfigError(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Whether this error is scoped to a single key.
    pub fn is_per_key(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::KeyError(_))
    }

    /// Whether this error was delivered to the whole batch.
    pub fn is_batch_failure(&self) -> bool {
        matches!(
            self,
            Error::RepositoryError(_)
                | Error::Timeout(_)
                | Error::FetchPanicked(_)
                | Error::BatchContract { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(key) => write!(f, "Not found: {}", key),
            Error::KeyError(msg) => write!(f, "Key error: {}", msg),
            Error::RepositoryError(msg) => write!(f, "Repository error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::FetchPanicked(msg) => write!(f, "Fetch panicked: {}", msg),
            Error::BatchContract { expected, found } => {
                write!(
                    f,
                    "Batch contract violated: expected {} outcomes, found {}",
                    expected, found
                )
            }
            Error::ScopeCancelled => write!(f, "Scope cancelled"),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Error::Timeout(e.to_string())
        } else {
            Error::RepositoryError(e.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}
