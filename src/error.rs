//! Error handling utilities shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Convenient result type used throughout the crate.
pub type Result<T, E = VgmtokError> = std::result::Result<T, E>;

/// Domain-specific error describing failures during configuration, IO, capture decoding,
/// or vocabulary lookups.
#[derive(Debug, Error)]
pub enum VgmtokError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Filesystem IO error with optional context path.
    #[error("io error while processing {path:?}: {source}")]
    Io {
        /// Underlying IO error returned by the standard library.
        source: std::io::Error,
        /// Target path associated with the IO failure if available.
        path: Option<PathBuf>,
    },
    /// Capture data could not be decoded.
    #[error("malformed capture data: {0}")]
    Format(String),
    /// The vocabulary listing violates one of its invariants.
    #[error("invalid vocabulary: {0}")]
    InvalidVocabulary(String),
    /// A payload or token has no counterpart in the vocabulary where one is required.
    #[error("vocabulary mismatch: {0}")]
    Consistency(String),
    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Catch-all variant for invariants that should not occur.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for VgmtokError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl VgmtokError {
    /// Helper constructor that attaches an optional path when wrapping IO errors.
    pub fn io(source: std::io::Error, path: Option<PathBuf>) -> Self {
        Self::Io { source, path }
    }

    /// Wraps a capture decoding failure with the file it came from.
    pub fn in_file(self, path: &std::path::Path) -> Self {
        match self {
            Self::Format(message) => Self::Format(format!("{}: {message}", path.display())),
            other => other,
        }
    }
}
