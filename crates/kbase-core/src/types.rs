//! Domain types shared by the candidate sources, the fusion engine and the
//! coordinator.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub type ChunkId = String;
pub type Meta = HashMap<String, String>;

/// A unit of retrievable content produced by the external ingestion pipeline.
///
/// - `id`: globally unique chunk identifier
/// - `source_id`: stable identity of the originating source/collection
/// - `url`: origin URL of the source document
/// - `chunk_index`: position within the parent source
/// - `content`: the text payload of the chunk
/// - `metadata`: arbitrary key/value pairs attached at ingestion time
/// - `embeddings`: stored vectors keyed by their dimension bucket
///
/// The retrieval engine only reads chunks; it never mutates them. An
/// embedding stored under bucket `d` must have exactly length `d`
/// (checked by [`KnowledgeChunk::embedding_for`] and by the store writers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: ChunkId,
    pub source_id: String,
    pub url: String,
    pub chunk_index: usize,
    pub content: String,
    #[serde(default)]
    pub metadata: Meta,
    #[serde(default)]
    pub embeddings: BTreeMap<usize, Vec<f32>>,
}

impl KnowledgeChunk {
    /// The stored embedding for bucket `dimension`, if present and well
    /// formed. A vector whose length does not match its bucket is treated
    /// as absent rather than handed to a store comparison.
    pub fn embedding_for(&self, dimension: usize) -> Option<&[f32]> {
        self.embeddings
            .get(&dimension)
            .filter(|v| v.len() == dimension)
            .map(Vec::as_slice)
    }
}

/// A raw hit from a single candidate source: chunk id plus that source's
/// own score (vector similarity in `[0,1]`, or an opaque non-negative
/// lexical rank score).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    pub score: f32,
}

impl ScoredChunk {
    pub fn new(chunk_id: impl Into<ChunkId>, score: f32) -> Self {
        Self { chunk_id: chunk_id.into(), score }
    }
}

/// Which retrieval path(s) produced a fused result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Vector,
    Keyword,
    Hybrid,
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchType::Vector => write!(f, "vector"),
            MatchType::Keyword => write!(f, "keyword"),
            MatchType::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Labels a candidate source in degradation notes and logs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Vector,
    Lexical,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Vector => write!(f, "vector"),
            SourceKind::Lexical => write!(f, "lexical"),
        }
    }
}

/// Equality predicate over chunk metadata. Every listed pair must match
/// for a chunk to pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default)]
    pub equals: Meta,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }

    pub fn matches(&self, metadata: &Meta) -> bool {
        self.equals
            .iter()
            .all(|(k, v)| metadata.get(k).is_some_and(|actual| actual == v))
    }
}

/// A retrieval request. At least one of `text` and `embedding` must be
/// present; the coordinator rejects queries that carry neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub limit: usize,
    #[serde(default)]
    pub filter: MetadataFilter,
    pub source_scope: Option<String>,
    pub hybrid_enabled: bool,
    pub rerank_enabled: bool,
}

impl SearchQuery {
    pub fn text(query: impl Into<String>, limit: usize) -> Self {
        Self {
            text: Some(query.into()),
            embedding: None,
            limit,
            filter: MetadataFilter::default(),
            source_scope: None,
            hybrid_enabled: true,
            rerank_enabled: false,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_scope(mut self, source_id: impl Into<String>) -> Self {
        self.source_scope = Some(source_id.into());
        self
    }

    pub fn with_rerank(mut self) -> Self {
        self.rerank_enabled = true;
        self
    }
}

/// One entry in the fused candidate list, before hydration and reranking.
///
/// `match_type` is `Hybrid` exactly when both per-source scores are
/// present; a chunk id appears at most once in a fused list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResult {
    pub chunk_id: ChunkId,
    pub vector_score: Option<f32>,
    pub text_score: Option<f32>,
    pub fused_score: f32,
    pub match_type: MatchType,
}

/// Final output unit: the hydrated chunk, its scores, and a stable
/// 1-based rank. Ties in score order are broken by chunk id ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk: KnowledgeChunk,
    pub vector_score: Option<f32>,
    pub text_score: Option<f32>,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
    pub match_type: MatchType,
    pub rank: usize,
}

/// Non-fatal quality losses recorded while answering a query. Callers use
/// these to tell best-effort results from fully successful ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// One candidate source failed; the surviving source's results were
    /// returned alone.
    PartialRetrieval { source: SourceKind, reason: String },
    /// Reranking was requested but could not be applied; results are in
    /// fused order.
    Reranker { reason: String },
}

/// The ordered result list plus any degradation annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<RankedResult>,
    pub degradations: Vec<Degradation>,
}

impl SearchResponse {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}
