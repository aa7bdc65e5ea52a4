//! Second-pass reordering of the fused candidate window with a
//! cross-encoder-style scorer.
//!
//! Scoring runs in batches behind a bounded semaphore so one query's
//! rerank load cannot starve others. Failures degrade, they do not abort:
//! a failed batch is retried document by document, and a document that
//! still cannot be scored keeps its pre-rerank fused position. Only when
//! the scorer produces nothing at all does the whole window fall back to
//! fused order.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use kbase_core::error::SourceError;
use kbase_core::traits::RerankScorer;
use kbase_core::types::{CandidateResult, Degradation};

/// A candidate with the outcome of the rerank pass attached.
#[derive(Debug, Clone)]
pub struct RerankedCandidate {
    pub candidate: CandidateResult,
    pub rerank_score: Option<f32>,
}

pub struct RerankEngine {
    scorer: Arc<dyn RerankScorer>,
    permits: Arc<Semaphore>,
    batch_size: usize,
}

impl RerankEngine {
    pub fn new(scorer: Arc<dyn RerankScorer>, max_in_flight: usize, batch_size: usize) -> Self {
        Self {
            scorer,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            batch_size: batch_size.max(1),
        }
    }

    /// Score `candidates` against `query_text` and reorder. `documents`
    /// holds the chunk text aligned by index with `candidates`. Returns
    /// the reordered list truncated to `limit`, plus a degradation note
    /// when the scorer was entirely unreachable.
    pub async fn rerank(
        &self,
        query_text: &str,
        candidates: Vec<CandidateResult>,
        documents: &[String],
        limit: usize,
    ) -> (Vec<RerankedCandidate>, Option<Degradation>) {
        debug_assert_eq!(candidates.len(), documents.len());
        if candidates.is_empty() {
            return (Vec::new(), None);
        }

        let batches: Vec<(usize, &[String])> = documents
            .chunks(self.batch_size)
            .enumerate()
            .map(|(i, docs)| (i * self.batch_size, docs))
            .collect();

        let futures = batches.into_iter().map(|(offset, docs)| {
            let scorer = Arc::clone(&self.scorer);
            let permits = Arc::clone(&self.permits);
            async move {
                // Closed-semaphore errors cannot happen: the semaphore
                // lives as long as the engine.
                let _permit = permits.acquire().await;
                match scorer.score(query_text, docs).await {
                    Ok(scores) if scores.len() == docs.len() => {
                        (offset, scores.into_iter().map(Some).collect::<Vec<_>>())
                    }
                    Ok(scores) => {
                        warn!(
                            expected = docs.len(),
                            got = scores.len(),
                            "reranker returned a misaligned batch; rescoring individually"
                        );
                        (offset, Self::score_singly(&*scorer, query_text, docs).await)
                    }
                    Err(e) => {
                        debug!(error = %e, "rerank batch failed; rescoring individually");
                        (offset, Self::score_singly(&*scorer, query_text, docs).await)
                    }
                }
            }
        });
        let mut scores: Vec<Option<f32>> = vec![None; candidates.len()];
        for (offset, batch_scores) in futures::future::join_all(futures).await {
            for (i, score) in batch_scores.into_iter().enumerate() {
                scores[offset + i] = score;
            }
        }

        if scores.iter().all(Option::is_none) {
            warn!("reranker unreachable; falling back to fused order");
            let mut out: Vec<RerankedCandidate> = candidates
                .into_iter()
                .map(|candidate| RerankedCandidate { candidate, rerank_score: None })
                .collect();
            out.truncate(limit);
            let note = Degradation::Reranker {
                reason: "reranker unreachable; results are in fused order".to_string(),
            };
            return (out, Some(note));
        }

        (Self::reorder(candidates, scores, limit), None)
    }

    async fn score_singly(
        scorer: &dyn RerankScorer,
        query_text: &str,
        docs: &[String],
    ) -> Vec<Option<f32>> {
        let mut scores = Vec::with_capacity(docs.len());
        for doc in docs {
            match scorer.score(query_text, std::slice::from_ref(doc)).await {
                Ok(s) if s.len() == 1 => scores.push(Some(s[0])),
                Ok(_) | Err(_) => scores.push(None),
            }
        }
        scores
    }

    /// Scored candidates order purely by rerank score descending (chunk id
    /// ascending on ties); unscored candidates are slotted back at their
    /// pre-rerank fused positions.
    fn reorder(
        candidates: Vec<CandidateResult>,
        scores: Vec<Option<f32>>,
        limit: usize,
    ) -> Vec<RerankedCandidate> {
        let mut scored: Vec<(usize, RerankedCandidate)> = Vec::new();
        let mut unscored: Vec<(usize, RerankedCandidate)> = Vec::new();
        for (i, (candidate, rerank_score)) in candidates.into_iter().zip(scores).enumerate() {
            let entry = RerankedCandidate { candidate, rerank_score };
            match entry.rerank_score {
                Some(_) => scored.push((i, entry)),
                None => unscored.push((i, entry)),
            }
        }
        scored.sort_by(|(_, a), (_, b)| {
            b.rerank_score
                .unwrap_or(f32::NEG_INFINITY)
                .total_cmp(&a.rerank_score.unwrap_or(f32::NEG_INFINITY))
                .then_with(|| a.candidate.chunk_id.cmp(&b.candidate.chunk_id))
        });

        let mut out: Vec<RerankedCandidate> = scored.into_iter().map(|(_, c)| c).collect();
        for (original_index, entry) in unscored {
            let at = original_index.min(out.len());
            out.insert(at, entry);
        }
        out.truncate(limit);
        out
    }
}

/// Model-free fallback scorer: fraction of distinct query terms present in
/// the document. Lets deployments exercise the rerank path before an
/// external cross-encoder is wired in.
pub struct TermOverlapScorer;

#[async_trait]
impl RerankScorer for TermOverlapScorer {
    async fn score(&self, query_text: &str, documents: &[String]) -> Result<Vec<f32>, SourceError> {
        let query_lower = query_text.to_lowercase();
        let terms: HashSet<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(vec![0.0; documents.len()]);
        }
        Ok(documents
            .iter()
            .map(|doc| {
                let doc_lower = doc.to_lowercase();
                let overlap = terms.iter().filter(|t| doc_lower.contains(*t)).count();
                overlap as f32 / terms.len() as f32
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbase_core::types::MatchType;

    fn candidate(id: &str, fused: f32) -> CandidateResult {
        CandidateResult {
            chunk_id: id.to_string(),
            vector_score: Some(fused),
            text_score: None,
            fused_score: fused,
            match_type: MatchType::Vector,
        }
    }

    struct FixedScorer;

    #[async_trait]
    impl RerankScorer for FixedScorer {
        async fn score(&self, _q: &str, docs: &[String]) -> Result<Vec<f32>, SourceError> {
            Ok(docs.iter().map(|d| d.len() as f32).collect())
        }
    }

    struct DownScorer;

    #[async_trait]
    impl RerankScorer for DownScorer {
        async fn score(&self, _q: &str, _docs: &[String]) -> Result<Vec<f32>, SourceError> {
            Err(SourceError::Unavailable("model host down".to_string()))
        }
    }

    /// Fails on any batch containing the poison marker, and on the poison
    /// document itself when scored alone.
    struct PoisonScorer;

    #[async_trait]
    impl RerankScorer for PoisonScorer {
        async fn score(&self, _q: &str, docs: &[String]) -> Result<Vec<f32>, SourceError> {
            if docs.iter().any(|d| d.contains("poison")) {
                return Err(SourceError::Backend(anyhow::anyhow!("scorer choked")));
            }
            Ok(docs.iter().map(|d| d.len() as f32).collect())
        }
    }

    #[tokio::test]
    async fn success_orders_purely_by_rerank_score() {
        let engine = RerankEngine::new(Arc::new(FixedScorer), 2, 16);
        let candidates = vec![candidate("a", 0.9), candidate("b", 0.5), candidate("c", 0.1)];
        let docs = vec!["xx".to_string(), "xxxx".to_string(), "xxxxxx".to_string()];

        let (out, note) = engine.rerank("q", candidates, &docs, 3).await;
        assert!(note.is_none());
        let ids: Vec<&str> = out.iter().map(|c| c.candidate.chunk_id.as_str()).collect();
        // Longest doc scores highest, inverting the fused order.
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert!(out.iter().all(|c| c.rerank_score.is_some()));
    }

    #[tokio::test]
    async fn total_outage_degrades_to_fused_order() {
        let engine = RerankEngine::new(Arc::new(DownScorer), 2, 16);
        let candidates = vec![candidate("a", 0.9), candidate("b", 0.5)];
        let docs = vec!["one".to_string(), "two".to_string()];

        let (out, note) = engine.rerank("q", candidates, &docs, 2).await;
        assert!(matches!(note, Some(Degradation::Reranker { .. })));
        let ids: Vec<&str> = out.iter().map(|c| c.candidate.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(out.iter().all(|c| c.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn poison_document_keeps_its_fused_position() {
        // Batch size 16 puts all three docs in one failing batch; the
        // per-document retry then rescues the two healthy ones.
        let engine = RerankEngine::new(Arc::new(PoisonScorer), 2, 16);
        let candidates = vec![candidate("a", 0.9), candidate("b", 0.5), candidate("c", 0.1)];
        let docs = vec!["xx".to_string(), "poison".to_string(), "xxxxxx".to_string()];

        let (out, note) = engine.rerank("q", candidates, &docs, 3).await;
        assert!(note.is_none());
        let ids: Vec<&str> = out.iter().map(|c| c.candidate.chunk_id.as_str()).collect();
        // c (len 6) outranks a (len 2); b stays at its fused slot (index 1).
        assert_eq!(ids, vec!["c", "b", "a"]);
        let b = out.iter().find(|c| c.candidate.chunk_id == "b").expect("b kept");
        assert!(b.rerank_score.is_none());
    }

    #[tokio::test]
    async fn window_is_truncated_to_limit() {
        let engine = RerankEngine::new(Arc::new(FixedScorer), 2, 2);
        let candidates = vec![candidate("a", 0.9), candidate("b", 0.5), candidate("c", 0.1)];
        let docs = vec!["xx".to_string(), "xxxx".to_string(), "xxxxxx".to_string()];

        let (out, _) = engine.rerank("q", candidates, &docs, 1).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].candidate.chunk_id, "c");
    }

    #[tokio::test]
    async fn term_overlap_scorer_scores_fraction_of_terms() {
        let scorer = TermOverlapScorer;
        let scores = scorer
            .score(
                "machine learning",
                &[
                    "machine learning models".to_string(),
                    "only machine here".to_string(),
                    "nothing relevant".to_string(),
                ],
            )
            .await
            .expect("score");
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert!((scores[1] - 0.5).abs() < 1e-6);
        assert!((scores[2] - 0.0).abs() < 1e-6);
    }
}
