//! Error types for cache operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Requested key has no intact entry
    #[error("cache entry not found: {0}")]
    NotFound(String),

    /// IO error during cache operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Required sibling file missing or unparsable
    #[error("cache corruption detected: {0}")]
    Corrupt(String),

    /// Lock could not be acquired within the configured bound
    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// Rename-based publication could not reach a consistent state
    #[error("atomic publish failed: {0}")]
    AtomicPublishFailed(String),

    /// Scope, key, or stage rejected at construction
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    /// Payload or metadata (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("invalid cache configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type alias for fingerprint computation
pub type FingerprintResult<T> = Result<T, FingerprintError>;

/// Errors that can occur while computing a compilation fingerprint
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// A referenced template directory exists but could not be walked
    #[error("failed to walk template directory {path}: {source}")]
    Io {
        /// Directory that could not be walked
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Canonical JSON encoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_cache_error_display() {
        let errors = vec![
            CacheError::NotFound("compilation/abc/code".to_string()),
            CacheError::Corrupt("metadata missing".to_string()),
            CacheError::LockTimeout("compilation/abc/code".to_string()),
            CacheError::AtomicPublishFailed("backup restore failed".to_string()),
            CacheError::InvalidKey("scope contains '/'".to_string()),
            CacheError::InvalidConfiguration("max_cache_size_bytes must be > 0".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_cache_error_from_io_error() {
        let io_error = IoError::new(ErrorKind::PermissionDenied, "access denied");
        let cache_error = CacheError::from(io_error);

        match cache_error {
            CacheError::Io(ref io_err) => {
                assert_eq!(io_err.kind(), ErrorKind::PermissionDenied);
            }
            _ => unreachable!("expected Io variant"),
        }
    }

    #[test]
    fn test_fingerprint_error_display() {
        let error = FingerprintError::Io {
            path: PathBuf::from("/templates/basic"),
            source: IoError::new(ErrorKind::NotFound, "gone"),
        };
        let message = error.to_string();
        assert!(message.contains("/templates/basic"));
        assert!(message.contains("gone"));
    }
}
