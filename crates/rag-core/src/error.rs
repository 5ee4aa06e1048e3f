//! Error types for the retrieval pipeline.

use thiserror::Error;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur in the retrieval pipeline.
#[derive(Error, Debug)]
pub enum RagError {
    /// An external collaborator failed or timed out.
    #[error("Collaborator '{collaborator}' unavailable: {message}")]
    CollaboratorUnavailable {
        collaborator: String,
        message: String,
    },

    /// Query is empty after normalization.
    #[error("Invalid query: {query:?}")]
    InvalidQuery { query: String },

    /// Cache grew past its bound after eviction.
    #[error("Cache capacity violated: {size} entries exceeds maximum of {max_size}")]
    CacheCapacityViolation { size: usize, max_size: usize },

    /// Document not found.
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RagError {
    /// Create a collaborator failure.
    pub fn collaborator(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CollaboratorUnavailable {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    /// Create a collaborator failure for a call that exceeded its deadline.
    pub fn timeout(collaborator: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::CollaboratorUnavailable {
            collaborator: collaborator.into(),
            message: format!("timed out after {}ms", timeout.as_millis()),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get a stable error code for logs and API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CollaboratorUnavailable { .. } => "COLLABORATOR_UNAVAILABLE",
            Self::InvalidQuery { .. } => "INVALID_QUERY",
            Self::CacheCapacityViolation { .. } => "CACHE_CAPACITY_VIOLATION",
            Self::DocumentNotFound { .. } => "DOCUMENT_NOT_FOUND",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
