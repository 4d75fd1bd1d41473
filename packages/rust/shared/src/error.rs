//! Error types for overdrive2opus.
//!
//! Library crates use [`ConvertError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all overdrive2opus operations.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching the noise model.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed tool output, XML markers, or timestamps.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Audio file metadata is missing something we need (track, duration).
    #[error("metadata error for {path:?}: {message}")]
    Metadata { path: PathBuf, message: String },

    /// An external tool failed to start or exited unsuccessfully.
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (empty folder, checksum mismatch, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ConvertError>;

impl ConvertError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a metadata error for a specific audio file.
    pub fn metadata(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a tool error naming the failing executable.
    pub fn tool(tool: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
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
