use thiserror::Error;

/// Request-fatal errors surfaced to the caller of the coordinator.
///
/// `Validation` and `UnsupportedDimension` are local-caller errors and are
/// never retried by the engine. `SearchUnavailable` means both candidate
/// sources failed for one request; it is distinct from an empty result
/// list, which means the stores answered and found nothing.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    Validation(String),

    #[error("Unsupported embedding dimension: {0}")]
    UnsupportedDimension(usize),

    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("Operation failed: {0}")]
    Operation(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors produced at the candidate-source boundary.
///
/// Only `Unavailable` is retryable; the coordinator retries it a bounded
/// number of times with backoff before treating the source as failed.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported embedding dimension: {0}")]
    UnsupportedDimension(usize),

    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

/// Errors from the external embedding provider. The provider is consumed
/// by the ingestion pipeline; the retrieval core only accepts precomputed
/// embeddings, but the contract lives here with the other seams.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Rate limited by embedding provider: {0}")]
    RateLimit(String),

    #[error("Transient embedding failure: {0}")]
    Transient(String),

    #[error("Embedding provider misconfigured: {0}")]
    FatalConfig(String),
}

impl EmbedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbedError::RateLimit(_) | EmbedError::Transient(_))
    }
}
