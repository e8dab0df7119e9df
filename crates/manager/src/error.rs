//! Key manager error types.
//!
//! This module defines errors returned by the foreground operations of
//! [`KeyManager`](crate::KeyManager) and by the key-material codec.

use std::sync::Arc;

use jwks_storage::{BoxError, StorageError};
use thiserror::Error;

/// Errors returned by key manager operations.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]` — new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyManagerError {
    /// No key with this identifier is present in the cached set.
    #[error("Key not found: {set}/{kid}")]
    KeyNotFound {
        /// Set that was searched.
        set: String,
        /// Key ID that was not found.
        kid: String,
    },

    /// The set is absent from the cache or holds no keys.
    #[error("Key set not found: {set}")]
    KeySetNotFound {
        /// Set that was not found.
        set: String,
    },

    /// The record store rejected or failed an operation.
    ///
    /// Wraps the original [`StorageError`] to preserve the full error source
    /// chain for debugging and structured logging.
    #[error("Key storage error: {0}")]
    Storage(
        /// The underlying storage error.
        #[source]
        StorageError,
    ),

    /// Persisted key material could not be decoded.
    #[error("Key decode error: {message}")]
    Decode {
        /// Description of the decoding failure.
        message: String,
        /// The underlying parser error.
        #[source]
        source: Option<BoxError>,
    },

    /// A key could not be serialized for storage.
    #[error("Key encode error: {message}")]
    Encode {
        /// Description of the encoding failure.
        message: String,
        /// The underlying serializer error.
        #[source]
        source: Option<BoxError>,
    },

    /// A change event violated the feed contract.
    #[error("Invalid change event: {0}")]
    InvalidChange(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl KeyManagerError {
    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(set: impl Into<String>, kid: impl Into<String>) -> Self {
        Self::KeyNotFound { set: set.into(), kid: kid.into() }
    }

    /// Creates a new `KeySetNotFound` error.
    #[must_use]
    pub fn key_set_not_found(set: impl Into<String>) -> Self {
        Self::KeySetNotFound { set: set.into() }
    }

    /// Creates a new `Decode` error with a message and source error.
    #[must_use]
    pub fn decode_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Decode { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Encode` error with a message and source error.
    #[must_use]
    pub fn encode_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Encode { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` for either not-found variant.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. } | Self::KeySetNotFound { .. })
    }
}

impl From<StorageError> for KeyManagerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidChange { message } => Self::InvalidChange(message),
            other => Self::Storage(other),
        }
    }
}

/// Result type alias for key manager operations.
pub type Result<T> = std::result::Result<T, KeyManagerError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = KeyManagerError::key_not_found("issuer-a", "k1");
        assert_eq!(err.to_string(), "Key not found: issuer-a/k1");
        assert!(err.is_not_found());

        let err = KeyManagerError::key_set_not_found("issuer-a");
        assert_eq!(err.to_string(), "Key set not found: issuer-a");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_storage_error_from_conversion() {
        let err: KeyManagerError = StorageError::connection("socket reset").into();
        assert!(matches!(err, KeyManagerError::Storage(StorageError::Connection { .. })));
        assert_eq!(err.to_string(), "Key storage error: Connection error: socket reset");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_invalid_change_is_not_a_storage_failure() {
        let err: KeyManagerError = StorageError::invalid_change("empty event").into();
        assert!(matches!(
            err,
            KeyManagerError::InvalidChange(ref message) if message == "empty event"
        ));
    }

    #[test]
    fn test_storage_error_preserves_source_chain() {
        let io = std::io::Error::other("socket closed");
        let err: KeyManagerError =
            StorageError::connection_with_source("change feed dropped", io).into();

        let level_1 = err.source().expect("level 1 source");
        assert_eq!(level_1.to_string(), "Connection error: change feed dropped");

        let level_2 = level_1.source().expect("level 2 source");
        assert_eq!(level_2.to_string(), "socket closed");
    }

    #[test]
    fn test_decode_error_keeps_parser_error() {
        let parse_err = serde_json::from_slice::<serde_json::Value>(b"{not json").unwrap_err();
        let err = KeyManagerError::decode_with_source("malformed key material", parse_err);

        assert!(err.to_string().starts_with("Key decode error: malformed key material"));
        assert!(err.source().is_some());
    }
}
