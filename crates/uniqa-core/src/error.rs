use thiserror::Error;

/// Failures of an embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider error: {0}")]
    Provider(String),
    #[error("embedding dimension mismatch: index expects {expected}, provider returned {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embeddings are disabled")]
    Disabled,
}

/// Error taxonomy of the retrieval core.
///
/// A query with no supporting evidence is not an error: it surfaces as an
/// irrelevant [`GradeResult`](crate::models::GradeResult).
#[derive(Debug, Error)]
pub enum RagError {
    /// The document is empty, unreadable, or produced no usable segments.
    #[error("ingestion failed: {0}")]
    Ingestion(String),
    #[error("{backend} index unavailable: {reason}")]
    IndexUnavailable { backend: &'static str, reason: String },
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("answer is not grounded in the retrieved context: {0}")]
    GroundingFailure(String),
    #[error("cache backend error: {0}")]
    Cache(String),
    /// A document, curated-answer or fact store could not be read.
    #[error("store error: {0}")]
    Store(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RagError {
    pub fn lexical(reason: impl ToString) -> Self {
        RagError::IndexUnavailable {
            backend: "lexical",
            reason: reason.to_string(),
        }
    }

    pub fn vector(reason: impl ToString) -> Self {
        RagError::IndexUnavailable {
            backend: "vector",
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
