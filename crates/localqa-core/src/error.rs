use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to load {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("Unsupported document format: {}", .path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding request timed out after {0:?}")]
    EmbeddingTimeout(std::time::Duration),

    #[error("Generation service unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("Generation request timed out after {0:?}")]
    GenerationTimeout(std::time::Duration),

    #[error("Vector dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Collection '{collection}' was built with embedding model '{expected}', not '{actual}'")]
    EmbeddingModelMismatch {
        collection: String,
        expected: String,
        actual: String,
    },

    #[error("Collection '{0}' has no entries")]
    IndexEmpty(String),

    #[error("Retrieval failed: {source}")]
    RetrievalFailed {
        #[source]
        source: Box<Error>,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn load(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        Self::Load { path: path.into(), source: source.into() }
    }

    pub fn retrieval(source: Error) -> Self {
        Self::RetrievalFailed { source: Box::new(source) }
    }

    /// Peels `RetrievalFailed` wrappers off to reach the underlying failure.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::RetrievalFailed { source } => source.root_cause(),
            other => other,
        }
    }

    /// External model failures are transient; the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::EmbeddingUnavailable(_)
                | Self::EmbeddingTimeout(_)
                | Self::GenerationUnavailable(_)
                | Self::GenerationTimeout(_)
        )
    }

    /// Errors that make every remaining file of an ingestion run fail the same way.
    pub fn aborts_ingestion(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::InvalidConfig(_)
                | Self::DimensionMismatch { .. }
                | Self::EmbeddingModelMismatch { .. }
                | Self::Storage(_)
                | Self::Cancelled
        )
    }
}
