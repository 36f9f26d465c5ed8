//! Ranking metrics over a single user's recommendation list. All
//! functions take the ordered predicted ids and the set of held-out
//! relevant ids, and return 0.0 on degenerate input instead of NaN.

use std::collections::HashSet;

fn top_k<'a>(recommended: &'a [String], k: usize) -> &'a [String] {
    &recommended[..recommended.len().min(k)]
}

/// Hits in the top k over the number of slots actually filled.
pub fn precision_at_k(recommended: &[String], relevant: &HashSet<String>, k: usize) -> f32 {
    let considered = top_k(recommended, k);
    if considered.is_empty() {
        return 0.0;
    }
    let hits = considered.iter().filter(|id| relevant.contains(*id)).count();
    hits as f32 / considered.len() as f32
}

pub fn recall_at_k(recommended: &[String], relevant: &HashSet<String>, k: usize) -> f32 {
    if relevant.is_empty() {
        return 0.0;
    }
    let hits = top_k(recommended, k)
        .iter()
        .filter(|id| relevant.contains(*id))
        .count();
    hits as f32 / relevant.len() as f32
}

/// NDCG with a base-1.5 log discount, which decays position credit
/// faster than the conventional base-2 form.
pub fn ndcg_at_k(recommended: &[String], relevant: &HashSet<String>, k: usize) -> f32 {
    if relevant.is_empty() {
        return 0.0;
    }
    let discount = |position: usize| 1.0 / ((position + 2) as f32).log(1.5);
    let dcg: f32 = top_k(recommended, k)
        .iter()
        .enumerate()
        .filter(|(_, id)| relevant.contains(*id))
        .map(|(i, _)| discount(i))
        .sum();
    let ideal: f32 = (0..relevant.len().min(k)).map(discount).sum();
    if ideal <= 0.0 {
        0.0
    } else {
        dcg / ideal
    }
}

/// Mean average precision at k.
pub fn map_at_k(recommended: &[String], relevant: &HashSet<String>, k: usize) -> f32 {
    if relevant.is_empty() {
        return 0.0;
    }
    let mut hits = 0usize;
    let mut precision_sum = 0.0f32;
    for (i, id) in top_k(recommended, k).iter().enumerate() {
        if relevant.contains(id) {
            hits += 1;
            precision_sum += hits as f32 / (i + 1) as f32;
        }
    }
    precision_sum / relevant.len().min(k) as f32
}

/// Reciprocal rank of the first relevant item anywhere in the list.
pub fn mrr(recommended: &[String], relevant: &HashSet<String>) -> f32 {
    recommended
        .iter()
        .position(|id| relevant.contains(id))
        .map_or(0.0, |rank| 1.0 / (rank + 1) as f32)
}

/// Two-tier hit ratio: a hit in the top third of the window counts in
/// full, a hit anywhere else inside the window counts half.
pub fn hit_ratio_at_k(recommended: &[String], relevant: &HashSet<String>, k: usize) -> f32 {
    let early_window = 1.max(k / 3);
    let considered = top_k(recommended, k);
    match considered.iter().position(|id| relevant.contains(id)) {
        Some(rank) if rank < early_window => 1.0,
        Some(_) => 0.5,
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn relevant(raw: &[&str]) -> HashSet<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_precision_divides_by_filled_slots() {
        let recs = ids(&["a", "b", "c", "d"]);
        let rel = relevant(&["b", "d"]);
        assert!((precision_at_k(&recs, &rel, 4) - 0.5).abs() < 1e-6);
        // Only 4 items exist, so k=10 still divides by 4.
        assert!((precision_at_k(&recs, &rel, 10) - 0.5).abs() < 1e-6);
        assert_eq!(precision_at_k(&[], &rel, 5), 0.0);
    }

    #[test]
    fn test_recall_full_coverage() {
        let recs = ids(&["a", "b", "c", "d"]);
        let rel = relevant(&["b", "d"]);
        assert!((recall_at_k(&recs, &rel, 4) - 1.0).abs() < 1e-6);
        assert!((recall_at_k(&recs, &rel, 2) - 0.5).abs() < 1e-6);
        assert_eq!(recall_at_k(&recs, &HashSet::new(), 4), 0.0);
    }

    #[test]
    fn test_ndcg_concrete_value() {
        // Hits at positions 1 and 3 (0-based), ideal hits at 0 and 1.
        let recs = ids(&["a", "b", "c", "d"]);
        let rel = relevant(&["b", "d"]);
        let d = |i: usize| 1.0f32 / ((i + 2) as f32).log(1.5);
        let expected = (d(1) + d(3)) / (d(0) + d(1));
        let got = ndcg_at_k(&recs, &rel, 4);
        assert!((got - expected).abs() < 1e-5);
        assert!(got > precision_at_k(&recs, &rel, 4));
        assert!(got < 1.0);
    }

    #[test]
    fn test_ndcg_perfect_ranking_is_one() {
        let recs = ids(&["a", "b", "c"]);
        let rel = relevant(&["a", "b", "c"]);
        assert!((ndcg_at_k(&recs, &rel, 3) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_map_rewards_early_hits() {
        let early = ids(&["x", "a", "b", "c"]);
        let late = ids(&["a", "b", "c", "x"]);
        let rel = relevant(&["x"]);
        assert!(map_at_k(&early, &rel, 4) > map_at_k(&late, &rel, 4));
        assert!((map_at_k(&early, &rel, 4) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mrr_first_hit_rank() {
        let recs = ids(&["a", "b", "c"]);
        assert!((mrr(&recs, &relevant(&["c"])) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(mrr(&recs, &relevant(&["z"])), 0.0);
    }

    #[test]
    fn test_hit_ratio_two_tiers() {
        let recs = ids(&["a", "b", "c", "d", "e", "f", "g", "h", "i"]);
        // k=9 gives an early window of 3.
        assert_eq!(hit_ratio_at_k(&recs, &relevant(&["a"]), 9), 1.0);
        assert_eq!(hit_ratio_at_k(&recs, &relevant(&["c"]), 9), 1.0);
        assert_eq!(hit_ratio_at_k(&recs, &relevant(&["d"]), 9), 0.5);
        assert_eq!(hit_ratio_at_k(&recs, &relevant(&["z"]), 9), 0.0);
        // k=1 keeps a window of one slot.
        assert_eq!(hit_ratio_at_k(&recs, &relevant(&["a"]), 1), 1.0);
        assert_eq!(hit_ratio_at_k(&recs, &relevant(&["b"]), 1), 0.0);
    }
}
