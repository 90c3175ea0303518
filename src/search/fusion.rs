//! Multi-query Reciprocal Rank Fusion.
//!
//! Each query variant contributes `1/(k + rank + 1)` to a candidate's RRF
//! score; the candidate's semantic score is the maximum seen across
//! variants. The ordering is deterministic regardless of variant
//! enumeration order: RRF sum descending, then max semantic score, then
//! chunk id.

use std::collections::HashMap;

use crate::models::SearchResult;

const RRF_K: f32 = 60.0;

/// A fused candidate: the raw result plus its aggregate scores.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub result: SearchResult,
    pub rrf_score: f32,
    /// Best semantic score observed for this chunk across all variants.
    pub max_score: f32,
}

/// Merge per-variant ranked lists into a single ranking of at most `limit`
/// candidates. Variants that failed are simply absent from the input.
pub fn multi_query_rrf_fusion(variant_results: &[Vec<SearchResult>], limit: usize) -> Vec<FusedHit> {
    let mut fused: HashMap<String, FusedHit> = HashMap::new();

    for results in variant_results {
        for (rank, result) in results.iter().enumerate() {
            let rrf = 1.0 / (RRF_K + rank as f32 + 1.0);
            let entry = fused
                .entry(result.id.clone())
                .or_insert_with(|| FusedHit {
                    result: result.clone(),
                    rrf_score: 0.0,
                    max_score: 0.0,
                });
            entry.rrf_score += rrf;
            entry.max_score = entry.max_score.max(result.score);
        }
    }

    let mut ranked: Vec<FusedHit> = fused.into_values().collect();
    ranked.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.max_score
                    .partial_cmp(&a.max_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.result.id.cmp(&b.result.id))
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn result(id: &str, score: f32) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            score,
            text: format!("text for {id}"),
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_single_list_preserves_order() {
        let lists = vec![vec![result("a", 0.9), result("b", 0.8), result("c", 0.7)]];
        let fused = multi_query_rrf_fusion(&lists, 10);
        let ids: Vec<&str> = fused.iter().map(|h| h.result.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_candidate_in_multiple_lists_wins() {
        let lists = vec![
            vec![result("a", 0.9), result("shared", 0.7)],
            vec![result("shared", 0.8), result("b", 0.6)],
        ];
        let fused = multi_query_rrf_fusion(&lists, 10);
        // "shared" appears in both lists (ranks 1 and 0) and outranks "a"
        assert_eq!(fused[0].result.id, "shared");
        assert!((fused[0].max_score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_order_independent_of_variant_enumeration() {
        let list1 = vec![result("a", 0.9), result("b", 0.5)];
        let list2 = vec![result("c", 0.8), result("a", 0.4)];

        let forward = multi_query_rrf_fusion(&[list1.clone(), list2.clone()], 10);
        let backward = multi_query_rrf_fusion(&[list2, list1], 10);

        let forward_ids: Vec<&str> = forward.iter().map(|h| h.result.id.as_str()).collect();
        let backward_ids: Vec<&str> = backward.iter().map(|h| h.result.id.as_str()).collect();
        assert_eq!(forward_ids, backward_ids);
    }

    #[test]
    fn test_tie_breaks_by_max_score_then_id() {
        // Same rank in disjoint lists → identical RRF sums
        let lists = vec![
            vec![result("zeta", 0.9)],
            vec![result("alpha", 0.9)],
            vec![result("mid", 0.95)],
        ];
        let fused = multi_query_rrf_fusion(&lists, 10);
        assert_eq!(fused[0].result.id, "mid"); // higher max score
        assert_eq!(fused[1].result.id, "alpha"); // then lexical
        assert_eq!(fused[2].result.id, "zeta");
    }

    #[test]
    fn test_truncates_to_limit() {
        let lists = vec![(0..20).map(|i| result(&format!("r{i:02}"), 0.9)).collect()];
        let fused = multi_query_rrf_fusion(&lists, 5);
        assert_eq!(fused.len(), 5);
    }

    #[test]
    fn test_rrf_constant() {
        let lists = vec![vec![result("a", 1.0)]];
        let fused = multi_query_rrf_fusion(&lists, 1);
        assert!((fused[0].rrf_score - 1.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_input() {
        assert!(multi_query_rrf_fusion(&[], 10).is_empty());
        assert!(multi_query_rrf_fusion(&[vec![]], 10).is_empty());
    }
}
