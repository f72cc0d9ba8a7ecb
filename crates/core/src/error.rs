//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid registry path: {0}")]
    InvalidRegistryPath(String),

    #[error("invalid package document: {0}")]
    InvalidPackage(String),

    #[error("package name mismatch: expected {expected}, got {actual}")]
    NameMismatch { expected: String, actual: String },

    #[error("version {0} already exists")]
    VersionExists(String),

    #[error("integrity mismatch for {filename}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("invalid attachment {filename}: {reason}")]
    InvalidAttachment { filename: String, reason: String },

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
