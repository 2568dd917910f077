//! Error types for archive-harvest
//!
//! This module provides the error taxonomy used throughout the crate:
//! - Transient failures (network, HTTP status, truncated bodies) that the retry
//!   executor retries according to policy
//! - Parse failures when a fetched page lacks the expected structure
//! - Filesystem failures when an output location cannot be created
//! - Exhausted retries, which carry the last underlying error
//! - Interruption, which is surfaced distinctly and never retried

use std::path::PathBuf;
use thiserror::Error;

use crate::types::BatchId;

/// Result type alias for archive-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for archive-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "workers")
        key: Option<String>,
    },

    /// Network error (timeout, connection reset, body read failure)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a non-success status code
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// Status code returned by the server
        status: u16,
        /// URL that was requested
        url: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An output location could not be created
    #[error("cannot prepare output location {path}: {source}")]
    Filesystem {
        /// Directory that could not be created
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Expected structure missing from a fetched page
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The stream ended before the declared content length was received
    #[error("incomplete download: expected {expected} bytes, received {received}")]
    IncompleteDownload {
        /// Declared content length
        expected: u64,
        /// Bytes actually written
        received: u64,
    },

    /// Every attempt allowed by the retry policy failed
    #[error("{operation} failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        /// Short description of the wrapped operation
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// Error returned by the final attempt
        #[source]
        last: Box<Error>,
    },

    /// Completion bookkeeping misuse
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// Metadata output error
    #[error("metadata output error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization error (config files)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was interrupted by an external signal
    #[error("interrupted")]
    Interrupted,

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

    /// Whether this error is (or wraps) an interruption
    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::Interrupted => true,
            Error::ExhaustedRetries { last, .. } => last.is_interrupted(),
            _ => false,
        }
    }
}

/// Errors raised while extracting structure from a fetched page
#[derive(Debug, Error)]
pub enum ParseError {
    /// A CSS selector in the configuration could not be parsed
    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector {
        /// The selector text
        selector: String,
        /// Parser message
        reason: String,
    },

    /// A required element was not found on the page
    #[error("missing {what} on page")]
    MissingElement {
        /// Which element was expected (e.g., "title")
        what: &'static str,
    },

    /// A link could not be resolved into an absolute URL
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl {
        /// The offending link
        url: String,
        /// Resolution failure message
        reason: String,
    },

    /// The asset URL has no usable file name
    #[error("cannot derive a file name from {url}")]
    NoFileName {
        /// The asset URL
        url: String,
    },
}

/// Completion coordinator misuse
#[derive(Debug, Error)]
pub enum BatchError {
    /// No batch with this id is registered
    #[error("batch {0} is not registered")]
    Unknown(BatchId),

    /// A batch with this id is already registered
    #[error("batch {0} is already registered")]
    AlreadyRegistered(BatchId),

    /// More completion signals than dispatched tasks
    #[error("batch {batch} received more than {expected} completion signals")]
    Overflow {
        /// Batch that overflowed
        batch: BatchId,
        /// Expected number of signals
        expected: usize,
    },
}
