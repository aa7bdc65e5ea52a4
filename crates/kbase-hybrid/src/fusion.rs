//! Fuses vector and lexical candidate lists into one ranked,
//! deduplicated, provenance-tagged list.
//!
//! The two inputs live on different scales: vector similarities are
//! already in `[0,1]`, lexical rank scores are opaque non-negative reals.
//! Lexical scores are first normalized onto the vector scale (strategy is
//! pluggable; the default divides by the batch maximum, clamped to 1.0),
//! then combined as `w_v * vector + w_t * text` with weights validated to
//! sum to 1.0. A chunk seen by only one source keeps the other score
//! absent; it is never guessed or interpolated.

use std::collections::HashMap;

use kbase_core::config::{FusionSettings, TextNormalization};
use kbase_core::types::{CandidateResult, ChunkId, MatchType, ScoredChunk};

#[derive(Default)]
struct PartialScores {
    vector: Option<f32>,
    text: Option<f32>,
}

/// Normalize raw lexical scores in place, returning `None` for the whole
/// batch when the strategy cannot produce meaningful values (e.g. batch
/// max of zero, which would divide by zero).
fn normalize_text_scores(hits: &[ScoredChunk], strategy: TextNormalization) -> Option<Vec<f32>> {
    if hits.is_empty() {
        return None;
    }
    match strategy {
        TextNormalization::Identity => Some(hits.iter().map(|h| h.score.clamp(0.0, 1.0)).collect()),
        TextNormalization::BatchMax => {
            let max = hits.iter().map(|h| h.score).fold(0.0f32, f32::max);
            if max <= 0.0 {
                // No positive rank score anywhere: treat every text score
                // as absent rather than emit NaN.
                return None;
            }
            Some(hits.iter().map(|h| (h.score / max).clamp(0.0, 1.0)).collect())
        }
    }
}

/// Full outer join by chunk id, score fusion, provenance tagging, and the
/// deterministic sort. The returned list is untruncated; see
/// [`window_len`] for the cut the coordinator applies.
pub fn fuse(
    vector_hits: &[ScoredChunk],
    text_hits: &[ScoredChunk],
    settings: &FusionSettings,
) -> Vec<CandidateResult> {
    let mut by_id: HashMap<ChunkId, PartialScores> = HashMap::new();

    for hit in vector_hits {
        let entry = by_id.entry(hit.chunk_id.clone()).or_default();
        // A source repeating an id keeps its best score.
        entry.vector = Some(entry.vector.map_or(hit.score, |s| s.max(hit.score)));
    }

    if let Some(normalized) = normalize_text_scores(text_hits, settings.normalization) {
        for (hit, score) in text_hits.iter().zip(normalized) {
            let entry = by_id.entry(hit.chunk_id.clone()).or_default();
            entry.text = Some(entry.text.map_or(score, |s| s.max(score)));
        }
    }

    let mut fused: Vec<CandidateResult> = by_id
        .into_iter()
        .map(|(chunk_id, scores)| {
            let match_type = match (scores.vector, scores.text) {
                (Some(_), Some(_)) => MatchType::Hybrid,
                (Some(_), None) => MatchType::Vector,
                _ => MatchType::Keyword,
            };
            let fused_score = settings.vector_weight * scores.vector.unwrap_or(0.0)
                + settings.text_weight * scores.text.unwrap_or(0.0);
            CandidateResult {
                chunk_id,
                vector_score: scores.vector,
                text_score: scores.text,
                fused_score,
                match_type,
            }
        })
        .collect();

    // Descending by fused score; ties break by chunk id ascending so the
    // same inputs always produce the same ordering.
    fused.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    fused
}

/// How many fused candidates to keep: the requested count, or an
/// over-fetched window when a reranker will reorder them afterwards.
pub fn window_len(limit: usize, rerank_enabled: bool, over_fetch_multiplier: usize) -> usize {
    if rerank_enabled {
        limit.saturating_mul(over_fetch_multiplier)
    } else {
        limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> FusionSettings {
        FusionSettings::default()
    }

    #[test]
    fn reference_scenario_orders_c_b_a() {
        // Lexical finds A (2.0) and C (1.0); vector finds B (0.60) and
        // C (0.85). With 0.7/0.3 weights and batch-max normalization:
        // A = 0.30 keyword, B = 0.42 vector, C = 0.745 hybrid.
        let text = vec![ScoredChunk::new("a", 2.0), ScoredChunk::new("c", 1.0)];
        let vector = vec![ScoredChunk::new("b", 0.60), ScoredChunk::new("c", 0.85)];

        let fused = fuse(&vector, &text, &settings());
        let ids: Vec<&str> = fused.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        assert_eq!(fused[0].match_type, MatchType::Hybrid);
        assert!((fused[0].fused_score - 0.745).abs() < 1e-6);
        assert_eq!(fused[1].match_type, MatchType::Vector);
        assert!((fused[1].fused_score - 0.42).abs() < 1e-6);
        assert_eq!(fused[2].match_type, MatchType::Keyword);
        assert!((fused[2].fused_score - 0.30).abs() < 1e-6);
    }

    #[test]
    fn provenance_follows_which_sources_saw_the_chunk() {
        let vector = vec![ScoredChunk::new("v", 0.9), ScoredChunk::new("both", 0.8)];
        let text = vec![ScoredChunk::new("k", 3.0), ScoredChunk::new("both", 1.0)];

        let fused = fuse(&vector, &text, &settings());
        let by_id: HashMap<&str, &CandidateResult> =
            fused.iter().map(|c| (c.chunk_id.as_str(), c)).collect();

        assert_eq!(by_id["v"].match_type, MatchType::Vector);
        assert!(by_id["v"].vector_score.is_some() && by_id["v"].text_score.is_none());
        assert_eq!(by_id["k"].match_type, MatchType::Keyword);
        assert!(by_id["k"].vector_score.is_none() && by_id["k"].text_score.is_some());
        assert_eq!(by_id["both"].match_type, MatchType::Hybrid);
        assert!(by_id["both"].vector_score.is_some() && by_id["both"].text_score.is_some());
    }

    #[test]
    fn chunk_ids_are_deduplicated() {
        let vector = vec![
            ScoredChunk::new("dup", 0.4),
            ScoredChunk::new("dup", 0.9),
        ];
        let text = vec![ScoredChunk::new("dup", 1.0)];

        let fused = fuse(&vector, &text, &settings());
        assert_eq!(fused.len(), 1);
        // Repeated source hits keep the best score.
        assert_eq!(fused[0].vector_score, Some(0.9));
    }

    #[test]
    fn fused_score_is_monotonic_in_each_input() {
        let text = vec![ScoredChunk::new("x", 1.0), ScoredChunk::new("pad", 2.0)];

        let low = fuse(&[ScoredChunk::new("x", 0.3)], &text, &settings());
        let high = fuse(&[ScoredChunk::new("x", 0.6)], &text, &settings());
        let score = |fused: &[CandidateResult]| {
            fused.iter().find(|c| c.chunk_id == "x").map(|c| c.fused_score)
        };
        assert!(score(&high) > score(&low));

        let vector = vec![ScoredChunk::new("x", 0.5)];
        let low = fuse(&vector, &[ScoredChunk::new("x", 1.0), ScoredChunk::new("pad", 4.0)], &settings());
        let high = fuse(&vector, &[ScoredChunk::new("x", 2.0), ScoredChunk::new("pad", 4.0)], &settings());
        assert!(score(&high) > score(&low));
    }

    #[test]
    fn equal_scores_break_ties_by_chunk_id() {
        let vector = vec![
            ScoredChunk::new("zeta", 0.5),
            ScoredChunk::new("alpha", 0.5),
            ScoredChunk::new("mid", 0.5),
        ];
        let fused = fuse(&vector, &[], &settings());
        let ids: Vec<&str> = fused.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn fusion_is_deterministic_across_runs() {
        let vector = vec![
            ScoredChunk::new("a", 0.5),
            ScoredChunk::new("b", 0.5),
            ScoredChunk::new("c", 0.7),
        ];
        let text = vec![ScoredChunk::new("b", 2.0), ScoredChunk::new("d", 2.0)];

        let first = fuse(&vector, &text, &settings());
        let second = fuse(&vector, &text, &settings());
        let ids = |fused: &[CandidateResult]| {
            fused.iter().map(|c| c.chunk_id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn empty_lexical_batch_leaves_text_scores_absent() {
        let vector = vec![ScoredChunk::new("a", 0.8)];
        let fused = fuse(&vector, &[], &settings());

        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].text_score, None);
        assert_eq!(fused[0].match_type, MatchType::Vector);
        assert!(fused[0].fused_score.is_finite());
    }

    #[test]
    fn all_zero_rank_scores_never_divide_by_zero() {
        let text = vec![ScoredChunk::new("a", 0.0), ScoredChunk::new("b", 0.0)];
        let fused = fuse(&[ScoredChunk::new("a", 0.4)], &text, &settings());

        for c in &fused {
            assert!(c.fused_score.is_finite());
            assert_eq!(c.text_score, None);
        }
        // Without a usable text score, "a" counts as vector-only.
        let a = fused.iter().find(|c| c.chunk_id == "a").expect("a present");
        assert_eq!(a.match_type, MatchType::Vector);
    }

    #[test]
    fn identity_normalization_passes_scores_through() {
        let text = vec![ScoredChunk::new("a", 0.25)];
        let settings = FusionSettings {
            normalization: TextNormalization::Identity,
            ..FusionSettings::default()
        };
        let fused = fuse(&[], &text, &settings);
        assert_eq!(fused[0].text_score, Some(0.25));
    }

    #[test]
    fn window_over_fetches_only_for_rerank() {
        assert_eq!(window_len(10, false, 5), 10);
        assert_eq!(window_len(10, true, 5), 50);
        assert_eq!(window_len(usize::MAX, true, 5), usize::MAX);
    }
}
