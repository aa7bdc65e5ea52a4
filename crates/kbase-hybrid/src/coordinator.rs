//! Orchestrates one retrieval request end to end: validation, dimension
//! resolution, parallel fan-out to the candidate sources, fusion,
//! hydration, optional reranking, and final ranking.
//!
//! Failure policy: a source that fails after retries degrades the response
//! when the other source survives, and fails the request only when every
//! path that ran is down. Dimension mismatches are never degraded around;
//! they are caller errors and fail fast.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use kbase_core::config::EngineSettings;
use kbase_core::error::{SearchError, SourceError};
use kbase_core::registry::DimensionRegistry;
use kbase_core::traits::{ChunkStore, LexicalCandidateSource, VectorCandidateSource};
use kbase_core::types::{
    CandidateResult, ChunkId, Degradation, KnowledgeChunk, RankedResult, ScoredChunk, SearchQuery,
    SearchResponse, SourceKind,
};

use crate::fusion;
use crate::rerank::RerankEngine;
use crate::retry;

pub struct HybridRetrievalCoordinator {
    registry: Arc<DimensionRegistry>,
    vector: Arc<dyn VectorCandidateSource>,
    lexical: Arc<dyn LexicalCandidateSource>,
    chunks: Arc<dyn ChunkStore>,
    reranker: Option<RerankEngine>,
    settings: EngineSettings,
}

impl HybridRetrievalCoordinator {
    pub fn new(
        registry: Arc<DimensionRegistry>,
        vector: Arc<dyn VectorCandidateSource>,
        lexical: Arc<dyn LexicalCandidateSource>,
        chunks: Arc<dyn ChunkStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            vector,
            lexical,
            chunks,
            reranker: None,
            settings,
        }
    }

    pub fn with_reranker(mut self, reranker: RerankEngine) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchError> {
        Self::validate(query)?;

        // Bind the dimension once; the handle pins both the length and the
        // storage partition for the whole request.
        let handle = match &query.embedding {
            Some(v) => Some(self.registry.resolve(v.len())?),
            None => None,
        };
        let has_text = query.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        let run_vector = handle.is_some();
        let run_lexical = if query.hybrid_enabled {
            has_text
        } else {
            !run_vector && has_text
        };

        let window = fusion::window_len(
            query.limit,
            query.rerank_enabled,
            self.settings.fusion.over_fetch_multiplier,
        );

        let vector_fut = async {
            if !run_vector {
                return None;
            }
            let (Some(handle), Some(embedding)) = (&handle, query.embedding.as_deref()) else {
                return None;
            };
            Some(
                self.bounded(SourceKind::Vector, || {
                    self.vector.fetch(
                        handle,
                        embedding,
                        &query.filter,
                        query.source_scope.as_deref(),
                        window,
                    )
                })
                .await,
            )
        };
        let lexical_fut = async {
            if !run_lexical {
                return None;
            }
            let Some(text) = query.text.as_deref() else {
                return None;
            };
            Some(
                self.bounded(SourceKind::Lexical, || {
                    self.lexical
                        .fetch(text, &query.filter, query.source_scope.as_deref(), window)
                })
                .await,
            )
        };
        let (vector_out, lexical_out) = tokio::join!(vector_fut, lexical_fut);

        // A dimension rejection means the caller sent a vector we cannot
        // compare; no amount of degradation makes that answerable.
        for out in [&vector_out, &lexical_out] {
            if let Some(Err(SourceError::UnsupportedDimension(len))) = out {
                return Err(SearchError::UnsupportedDimension(*len));
            }
        }

        let paths_run = usize::from(run_vector) + usize::from(run_lexical);
        let mut degradations = Vec::new();
        let mut failures = Vec::new();
        let vector_hits = Self::settle(SourceKind::Vector, vector_out, &mut degradations, &mut failures);
        let text_hits = Self::settle(SourceKind::Lexical, lexical_out, &mut degradations, &mut failures);
        if failures.len() == paths_run {
            return Err(SearchError::SearchUnavailable(failures.join("; ")));
        }

        let mut fused = fusion::fuse(&vector_hits, &text_hits, &self.settings.fusion);
        fused.truncate(window);
        if fused.is_empty() {
            info!(degraded = !degradations.is_empty(), "search matched nothing");
            return Ok(SearchResponse { results: Vec::new(), degradations });
        }

        let hydrated = self.hydrate(fused).await?;
        let scored = self.apply_rerank(query, has_text, hydrated, &mut degradations).await;

        let results: Vec<RankedResult> = scored
            .into_iter()
            .take(query.limit)
            .enumerate()
            .map(|(i, (candidate, chunk, rerank_score))| RankedResult {
                chunk,
                vector_score: candidate.vector_score,
                text_score: candidate.text_score,
                fused_score: candidate.fused_score,
                rerank_score,
                match_type: candidate.match_type,
                rank: i + 1,
            })
            .collect();

        info!(
            results = results.len(),
            degraded = !degradations.is_empty(),
            reranked = query.rerank_enabled,
            "search completed"
        );
        Ok(SearchResponse { results, degradations })
    }

    fn validate(query: &SearchQuery) -> Result<(), SearchError> {
        if query.limit == 0 {
            return Err(SearchError::Validation("limit must be at least 1".to_string()));
        }
        if query.embedding.as_ref().is_some_and(Vec::is_empty) {
            return Err(SearchError::Validation("embedding must be non-empty".to_string()));
        }
        let has_text = query.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        if !has_text && query.embedding.is_none() {
            return Err(SearchError::Validation(
                "query needs text or an embedding".to_string(),
            ));
        }
        Ok(())
    }

    /// One source call under the per-source budget: retries inside, one
    /// timeout around the whole thing.
    async fn bounded<T, F, Fut>(&self, source: SourceKind, op: F) -> Result<T, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let retrieval = &self.settings.retrieval;
        let budget = Duration::from_millis(retrieval.source_timeout_ms);
        match tokio::time::timeout(
            budget,
            retry::with_retry(retrieval.retry_attempts, retrieval.retry_backoff_ms, op),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SourceError::Unavailable(format!(
                "{source} source timed out after {}ms",
                budget.as_millis()
            ))),
        }
    }

    fn settle(
        source: SourceKind,
        outcome: Option<Result<Vec<ScoredChunk>, SourceError>>,
        degradations: &mut Vec<Degradation>,
        failures: &mut Vec<String>,
    ) -> Vec<ScoredChunk> {
        match outcome {
            Some(Ok(hits)) => hits,
            Some(Err(e)) => {
                warn!(%source, error = %e, "candidate source failed");
                failures.push(format!("{source}: {e}"));
                degradations.push(Degradation::PartialRetrieval {
                    source,
                    reason: e.to_string(),
                });
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Attach payloads to the fused window, preserving fused order. Ids the
    /// store no longer knows are dropped.
    async fn hydrate(
        &self,
        fused: Vec<CandidateResult>,
    ) -> Result<Vec<(CandidateResult, KnowledgeChunk)>, SearchError> {
        let ids: Vec<ChunkId> = fused.iter().map(|c| c.chunk_id.clone()).collect();
        let chunks = self
            .chunks
            .get_batch(&ids)
            .await
            .map_err(|e| SearchError::Operation(anyhow::Error::new(e)))?;
        let mut by_id: HashMap<ChunkId, KnowledgeChunk> =
            chunks.into_iter().map(|c| (c.id.clone(), c)).collect();

        let mut hydrated = Vec::with_capacity(fused.len());
        for candidate in fused {
            match by_id.remove(&candidate.chunk_id) {
                Some(chunk) => hydrated.push((candidate, chunk)),
                None => {
                    warn!(chunk_id = %candidate.chunk_id, "fused candidate missing from chunk store");
                }
            }
        }
        Ok(hydrated)
    }

    async fn apply_rerank(
        &self,
        query: &SearchQuery,
        has_text: bool,
        hydrated: Vec<(CandidateResult, KnowledgeChunk)>,
        degradations: &mut Vec<Degradation>,
    ) -> Vec<(CandidateResult, KnowledgeChunk, Option<f32>)> {
        if !query.rerank_enabled {
            return hydrated.into_iter().map(|(c, k)| (c, k, None)).collect();
        }
        let engine = match &self.reranker {
            Some(engine) => engine,
            None => {
                degradations.push(Degradation::Reranker {
                    reason: "no reranker configured".to_string(),
                });
                return hydrated.into_iter().map(|(c, k)| (c, k, None)).collect();
            }
        };
        if !has_text {
            degradations.push(Degradation::Reranker {
                reason: "reranking requires query text".to_string(),
            });
            return hydrated.into_iter().map(|(c, k)| (c, k, None)).collect();
        }
        let query_text = query.text.as_deref().unwrap_or_default();

        let (candidates, chunks): (Vec<_>, Vec<_>) = hydrated.into_iter().unzip();
        let documents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let mut chunk_by_id: HashMap<ChunkId, KnowledgeChunk> =
            chunks.into_iter().map(|c| (c.id.clone(), c)).collect();

        let (reranked, note) = engine
            .rerank(query_text, candidates, &documents, query.limit)
            .await;
        if let Some(note) = note {
            degradations.push(note);
        }
        reranked
            .into_iter()
            .filter_map(|r| {
                chunk_by_id
                    .remove(&r.candidate.chunk_id)
                    .map(|chunk| (r.candidate, chunk, r.rerank_score))
            })
            .collect()
    }
}
