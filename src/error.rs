//! Error types for swell-collector
//!
//! This module provides the error handling for the library:
//! - [`Error`], the run-level error returned by fallible public APIs
//! - [`BundleError`], failures while creating or writing into a bundle
//! - [`FetchError`], per-attempt HTTP failures classified for retry
//!
//! Per-call and per-task failures are absorbed where they happen (a fetch
//! returns `None`, a failed producer contributes no records). Only failures
//! to initialize run resources propagate to the caller of
//! [`Collector::run`](crate::Collector::run).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for swell-collector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for swell-collector
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "GENERAL.timeout")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The shared HTTP session could not be opened
    #[error("failed to open HTTP session: {0}")]
    Session(#[source] reqwest::Error),

    /// Serialization error (manifest, JSON config)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Bundle directory or artifact error
    #[error("bundle error: {0}")]
    Bundle(#[from] BundleError),

    /// A producer failed while collecting
    #[error("producer {name} failed: {message}")]
    Producer {
        /// Producer name
        name: String,
        /// What went wrong
        message: String,
    },

    /// The run was cancelled before it could publish a bundle
    #[error("shutdown in progress: run cancelled")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for a `section.key` location
    pub(crate) fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Build a producer error, for use inside [`Producer`](crate::Producer) implementations
    pub fn producer(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Producer {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Bundle-related errors
#[derive(Debug, Error)]
pub enum BundleError {
    /// The run's bundle directory (or the data directory) could not be created
    #[error("failed to create bundle directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An artifact name that would escape the bundle directory
    #[error("invalid artifact name {name:?}: {reason}")]
    InvalidArtifactName {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// No free filename could be found for an artifact
    #[error("no free filename for {name} after {attempts} attempts")]
    NameExhausted {
        /// The requested name
        name: String,
        /// Number of suffixed candidates tried
        attempts: u32,
    },

    /// Writing a file inside the bundle failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// File being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a single HTTP attempt
///
/// Only failures that may be retried are represented here; terminal
/// outcomes such as 404 or 403 are reported by the fetcher as an absent
/// body, not as an error.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with a status that is worth retrying (400, 429, 500)
    #[error("HTTP {status} from {url}")]
    Status {
        /// Response status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// The URL could not be parsed or has no host
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl {
        /// Requested URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Transport-level failure: timeout, connection refused, TLS, body read
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Requested URL
        url: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_carries_key() {
        let err = Error::config("must be a positive integer", "GENERAL.timeout");
        match &err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("GENERAL.timeout")),
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "configuration error: must be a positive integer"
        );
    }

    #[test]
    fn bundle_error_converts_into_error() {
        let err: Error = BundleError::InvalidArtifactName {
            name: "../escape".into(),
            reason: "contains a path component".into(),
        }
        .into();
        assert!(matches!(err, Error::Bundle(_)));
        assert!(err.to_string().contains("../escape"));
    }

    #[test]
    fn status_error_mentions_code_and_url() {
        let err = FetchError::Status {
            status: 429,
            url: "https://api.windy.com/x".into(),
        };
        assert_eq!(err.to_string(), "HTTP 429 from https://api.windy.com/x");
    }
}
