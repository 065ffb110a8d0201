//! Error handling module for Narracut

use thiserror::Error;

use crate::domain::errors::DomainError;

/// Main error type for Narracut operations
#[derive(Error, Debug)]
pub enum NarracutError {
    /// Input file not found or inaccessible
    #[error("Input file not found: {path}")]
    InputFileNotFound { path: String },

    /// Required secret missing from the environment
    #[error("Missing credential: set {variable}")]
    MissingCredential { variable: String },

    /// Configuration could not be loaded or is invalid
    #[error("Invalid configuration: {message}")]
    ConfigError { message: String },

    /// No segment produced a clip
    #[error("No segment produced a clip; nothing to compose")]
    NothingComposed,

    /// Clips were produced but joining them failed
    #[error("Final video was not written: {message}")]
    FinalVideo { message: String },

    /// Error raised by the pipeline domain
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type alias for Narracut operations
pub type NarracutResult<T> = std::result::Result<T, NarracutError>;
