//! Error types for kuiper-tester.

use std::path::PathBuf;

use thiserror::Error;

/// Composition error type.
///
/// Every variant is raised while the topology is being composed; nothing is
/// validated at deploy time.
#[derive(Debug, Error)]
pub enum Error {
    /// A required parameter was not supplied.
    #[error("{key} is required")]
    MissingParameter { key: String },

    /// Private key could not be decoded.
    #[error("Malformed private key: {0}")]
    MalformedKey(String),

    /// Key algorithm has no host-key naming convention.
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// A template referenced by the composer does not exist.
    #[error("Template file not found: {}", path.display())]
    TemplateFileNotFound { path: PathBuf },

    /// Key generation failed.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Key could not be encoded to OpenSSH text.
    #[error("Key encoding failed: {0}")]
    KeyEncoding(String),

    /// Two configured providers map onto the same job name.
    #[error("Duplicate provider job: {0}")]
    DuplicateProvider(String),

    /// The deployment target already holds a component with this name.
    #[error("Component already deployed: {0}")]
    DuplicateComponent(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Manifest serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for kuiper-tester.
pub type Result<T, E = Error> = std::result::Result<T, E>;
