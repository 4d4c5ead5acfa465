//! Error types for cache operations
//!
//! Only producer failures ever leave [`get_or_compute`](crate::StaleWhileRevalidate::get_or_compute).
//! Storage and codec failures are contained where they happen and reported
//! through the cache's event listeners instead.

use thiserror::Error;

/// Error returned by storage backend implementations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend rejected or failed the operation
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// The backend could not be reached
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The backend lacks the requested capability
    #[error("Storage does not support {0}")]
    Unsupported(&'static str),
}

/// Result type alias for storage backend operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid cache configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The producer function failed while computing a value
    #[error("Producer failed: {0:#}")]
    Producer(anyhow::Error),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    /// Shorthand for a configuration error
    pub(crate) fn config(message: impl Into<String>) -> Self {
        CacheError::Config(message.into())
    }

    /// Whether this error was raised while resolving configuration
    pub fn is_config(&self) -> bool {
        matches!(self, CacheError::Config(_))
    }

    /// Unwrap the producer's own error, if this is a producer failure
    pub fn into_producer_error(self) -> Option<anyhow::Error> {
        match self {
            CacheError::Producer(error) => Some(error),
            _ => None,
        }
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::config("storage required");
        assert_eq!(error.to_string(), "Configuration error: storage required");

        let storage_error: CacheError = StorageError::Unavailable("redis down".to_string()).into();
        assert!(storage_error.to_string().contains("redis down"));

        let unsupported = StorageError::Unsupported("remove");
        assert_eq!(unsupported.to_string(), "Storage does not support remove");
    }

    #[test]
    fn test_producer_error_keeps_context() {
        let source = anyhow::anyhow!("upstream timeout").context("fetching profile");
        let error = CacheError::Producer(source);

        let display = error.to_string();
        assert!(display.contains("fetching profile"));
        assert!(display.contains("upstream timeout"));

        let inner = error.into_producer_error().unwrap();
        assert_eq!(inner.root_cause().to_string(), "upstream timeout");
    }

    #[test]
    fn test_error_conversion() {
        let error: CacheError = "test error".into();
        assert!(matches!(error, CacheError::Other(_)));
        assert!(!error.is_config());

        let error: CacheError = "test error".to_string().into();
        assert!(error.into_producer_error().is_none());
    }
}
