//! Error types for channel-harvest
//!
//! This module provides the error taxonomy for the acquisition engine:
//! - [`ProviderError`] - failures reported by the content provider, split into
//!   transient (rate limiting, server errors, timeouts) and terminal (not found,
//!   access denied) classes
//! - [`MediaError`] - per-item media download and validation failures
//! - [`ArchiveError`] - packaging and integrity verification failures
//! - [`Error`] - the crate-level error wrapping all of the above

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for channel-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for channel-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "acquisition.chunk_size")
        key: Option<String>,
    },

    /// Content provider error
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Media acquisition error
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    /// Archive packaging or verification error
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - work was interrupted
    #[error("shutdown in progress: work interrupted")]
    ShuttingDown,

    /// A blocking worker task panicked or was cancelled
    #[error("background task failed: {0}")]
    TaskFailed(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::TaskFailed(e.to_string())
    }
}

/// Errors reported across the content provider boundary
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider asked us to slow down
    #[error("rate limited{}", fmt_retry_after(.retry_after))]
    RateLimited {
        /// Server-requested wait before the next attempt, if any
        retry_after: Option<Duration>,
    },

    /// Transient server-side failure
    #[error("server error: {0}")]
    Server(String),

    /// Request timed out
    #[error("request timed out")]
    Timeout,

    /// Connection dropped or could not be established
    #[error("connection error: {0}")]
    Connection(String),

    /// Channel (or media) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Channel is private or the account is banned from it
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The name resolved to something that is not a broadcast channel
    #[error("not a channel: {0}")]
    NotAChannel(String),

    /// Anything else the provider reports
    #[error("{0}")]
    Other(String),
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(" (retry after {}s)", d.as_secs()))
        .unwrap_or_default()
}

impl ProviderError {
    /// Terminal errors end processing for the channel without retrying
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProviderError::NotFound(_)
                | ProviderError::AccessDenied(_)
                | ProviderError::NotAChannel(_)
        )
    }
}

/// Media download and validation errors (per-item failures)
#[derive(Debug, Error)]
pub enum MediaError {
    /// Download exceeded the per-file timeout
    #[error("download of {path} timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// Final destination of the download
        path: PathBuf,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The provider failed the download
    #[error("provider failed download: {0}")]
    Provider(#[from] ProviderError),

    /// The provider reported success but produced no file
    #[error("download produced no file at {path}")]
    Missing {
        /// Temporary path that should have been written
        path: PathBuf,
    },

    /// The downloaded file is below the sanity threshold
    #[error("downloaded file {path} too small ({size} bytes, need more than {min})")]
    TooSmall {
        /// Temporary path of the rejected download
        path: PathBuf,
        /// Actual size in bytes
        size: u64,
        /// Minimum acceptable size in bytes
        min: u64,
    },

    /// Image re-encoding failed
    #[error("image optimization failed for {path}: {reason}")]
    Optimize {
        /// Image being optimized
        path: PathBuf,
        /// Decoder or encoder message
        reason: String,
    },

    /// Filesystem error while committing the download
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown interrupted the download
    #[error("download cancelled by shutdown")]
    Cancelled,
}

/// Archive packaging and verification errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Source file does not exist
    #[error("source file missing: {path}")]
    SourceMissing {
        /// Missing file
        path: PathBuf,
    },

    /// Source file is empty
    #[error("source file is empty: {path}")]
    EmptySource {
        /// Zero-byte file
        path: PathBuf,
    },

    /// No archive is open for writing
    #[error("no archive open")]
    NotOpen,

    /// Entry failed CRC validation or the container could not be read back
    #[error("integrity check failed for {path}: {reason}")]
    Corrupt {
        /// Archive file that failed verification
        path: PathBuf,
        /// Entry name or reader error
        reason: String,
    },

    /// Underlying zip library error
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_provider_errors_are_classified() {
        assert!(ProviderError::NotFound("x".into()).is_terminal());
        assert!(ProviderError::AccessDenied("x".into()).is_terminal());
        assert!(ProviderError::NotAChannel("x".into()).is_terminal());

        assert!(!ProviderError::RateLimited { retry_after: None }.is_terminal());
        assert!(!ProviderError::Server("500".into()).is_terminal());
        assert!(!ProviderError::Timeout.is_terminal());
    }

    #[test]
    fn rate_limited_display_includes_wait() {
        let err = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(42)),
        };
        assert_eq!(err.to_string(), "rate limited (retry after 42s)");

        let err = ProviderError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn config_error_carries_key() {
        let err = Error::config("acquisition.chunk_size", "must be at least 1");
        match err {
            Error::Config { message, key } => {
                assert_eq!(message, "must be at least 1");
                assert_eq!(key.as_deref(), Some("acquisition.chunk_size"));
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn nested_errors_convert_into_crate_error() {
        let err: Error = ProviderError::Timeout.into();
        assert!(matches!(err, Error::Provider(ProviderError::Timeout)));

        let err: Error = MediaError::Cancelled.into();
        assert!(err.to_string().contains("cancelled"));
    }
}
