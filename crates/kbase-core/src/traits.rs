use async_trait::async_trait;

use crate::error::{EmbedError, SourceError};
use crate::registry::DimensionHandle;
use crate::types::{ChunkId, KnowledgeChunk, MetadataFilter, ScoredChunk};

/// Nearest-neighbor lookup against the vector-indexed store.
///
/// `query_vector.len()` must equal `handle.dimension()`; implementations
/// check this before any remote call and fail with
/// [`SourceError::UnsupportedDimension`] instead of silently comparing
/// across partitions. Scores are similarities in `[0,1]`, 1.0 meaning
/// identical direction.
#[async_trait]
pub trait VectorCandidateSource: Send + Sync {
    async fn fetch(
        &self,
        handle: &DimensionHandle,
        query_vector: &[f32],
        filter: &MetadataFilter,
        source_scope: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, SourceError>;
}

/// Relevance-ranked full-text lookup against the lexical index.
///
/// Scores are whatever monotonically-increasing measure the backend emits,
/// treated as opaque non-negative reals on their own scale. A query with no
/// matching terms yields an empty list, not an error.
#[async_trait]
pub trait LexicalCandidateSource: Send + Sync {
    async fn fetch(
        &self,
        query_text: &str,
        filter: &MetadataFilter,
        source_scope: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, SourceError>;
}

/// Cross-encoder-style relevance scorer. Must return exactly one score per
/// document, aligned by index.
#[async_trait]
pub trait RerankScorer: Send + Sync {
    async fn score(
        &self,
        query_text: &str,
        documents: &[String],
    ) -> Result<Vec<f32>, SourceError>;
}

/// Read-only access to chunk payloads, used to hydrate fused candidates
/// into client-facing results. Ids that are unknown to the store are
/// simply absent from the returned batch.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn get_batch(&self, ids: &[ChunkId]) -> Result<Vec<KnowledgeChunk>, SourceError>;
}

/// Embedding provider contract. Consumed by the external ingestion
/// pipeline; the retrieval core accepts precomputed embeddings and never
/// calls this itself.
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}
