//! Error types for NODEKO.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for NODEKO operations.
pub type Result<T> = std::result::Result<T, NodekoError>;

/// Main error type for NODEKO.
#[derive(Error, Debug)]
pub enum NodekoError {
    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Archiving errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to archive {path:?}: {reason}")]
    ArchiveFailed { path: PathBuf, reason: String },

    // Registry errors
    #[error("Invalid image reference {image:?}: {reason}")]
    InvalidImageRef { image: String, reason: String },

    #[error("Failed to pull {image}: {reason}")]
    PullFailed { image: String, reason: String },

    #[error("Failed to push {image}: {reason}")]
    PushFailed { image: String, reason: String },

    // Image configuration errors
    #[error("Invalid image configuration: {reason}")]
    InvalidImageConfig { reason: String },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// A build result replayed from the cache. The original failure is
    /// shared between every waiter on the same key, hence the `Arc`.
    #[error(transparent)]
    Shared(#[from] Arc<NodekoError>),
}
