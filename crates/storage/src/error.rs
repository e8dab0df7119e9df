//! Storage error types and result alias.
//!
//! Every [`KeyRecordStore`](crate::KeyRecordStore) implementation maps its
//! internal failures onto [`StorageError`], so consumers can reason about
//! failures without knowing which backend produced them.
//!
//! # Error Types
//!
//! - [`StorageError::Connection`] - Network, connection, or change-feed failures
//! - [`StorageError::Internal`] - Backend-specific internal errors
//! - [`StorageError::InvalidChange`] - A change event that carries neither an old nor a new record
//!
//! # Example
//!
//! ```
//! use jwks_storage::{StorageError, StorageResult};
//!
//! fn connect(endpoint: &str) -> StorageResult<()> {
//!     Err(StorageError::connection(format!("{endpoint} unreachable")))
//! }
//!
//! assert!(connect("db:28015").unwrap_err().is_transient());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during record store operations.
///
/// Errors preserve their source chain via the `#[source]` attribute, enabling
/// debugging tools to display the full error context.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Connection or network error.
    ///
    /// Also used for change-feed interruptions: a subscriber that falls
    /// behind or loses its connection observes this variant and must
    /// resubscribe.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal storage backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// A change event violated the feed contract.
    ///
    /// Every change event must carry an old record, a new record, or both.
    #[error("Invalid change event: {message}")]
    InvalidChange {
        /// Description of the violation.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `InvalidChange` error.
    #[must_use]
    pub fn invalid_change(message: impl Into<String>) -> Self {
        Self::InvalidChange { message: message.into() }
    }

    /// Returns `true` for failures that may succeed when retried, which are
    /// connection and change-feed errors.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
