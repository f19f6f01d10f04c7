//! Error types for jobharvest.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Expected terminal conditions of a collection run (no scroll container,
//! attempt cap, stagnation) are not errors; see `Termination` in the
//! collector crate.

use std::path::PathBuf;

/// Top-level error type for all jobharvest operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while loading a listing page.
    #[error("network error: {0}")]
    Network(String),

    /// A render surface call failed (navigation, query, scroll, evaluate).
    #[error("render surface error: {0}")]
    Surface(String),

    /// A single rendered item could not be turned into a record.
    #[error("extraction error: {message}")]
    Extraction { message: String },

    /// Catalog store read or write error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (missing identity, bad selector, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A bounded wait ran out.
    #[error("timed out after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an extraction error from any displayable message.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, millis: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            millis,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
