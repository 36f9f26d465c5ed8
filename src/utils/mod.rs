// Utility functions shared across models and the blender.

/// Normalize a score to [0, 1] range.
pub fn normalize_score(score: f32, min: f32, max: f32) -> f32 {
    if max - min < f32::EPSILON {
        0.5
    } else {
        ((score - min) / (max - min)).clamp(0.0, 1.0)
    }
}

/// Percentile of a sample (linear interpolation, p in [0, 1]).
/// Returns 0.0 for an empty slice.
pub fn percentile(values: &[f32], p: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f32> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p = p.clamp(0.0, 1.0);
    let rank = p * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f32;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Median of a sample. Returns 0.0 for an empty slice.
pub fn median(values: &[f32]) -> f32 {
    percentile(values, 0.5)
}

/// Robust-scale scores into [0, 1]: center on the median, divide by the
/// interquartile range, clamp to +-3 scaled units, then rescale. Falls back
/// to min-max when the IQR degenerates, and to 0.5 for constant input.
/// Resists outliers skewing the blend better than naive min-max.
pub fn robust_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let med = median(scores);
    let iqr = percentile(scores, 0.75) - percentile(scores, 0.25);

    if iqr > f32::EPSILON {
        scores
            .iter()
            .map(|&s| {
                let scaled = ((s - med) / iqr).clamp(-3.0, 3.0);
                (scaled + 3.0) / 6.0
            })
            .collect()
    } else {
        let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        scores.iter().map(|&s| normalize_score(s, min, max)).collect()
    }
}

/// Sort (id, score) pairs by score descending, NaN-safe.
pub fn sort_by_score_desc<T>(items: &mut [(T, f32)]) {
    items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

/// Case-insensitive bidirectional containment check used by the
/// category/chain filtered queries.
pub fn fuzzy_match(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_score() {
        assert!((normalize_score(5.0, 0.0, 10.0) - 0.5).abs() < 0.001);
        assert!((normalize_score(10.0, 0.0, 10.0) - 1.0).abs() < 0.001);
        assert!((normalize_score(3.0, 3.0, 3.0) - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((percentile(&values, 0.5) - 3.0).abs() < 0.001);
        assert!((percentile(&values, 0.0) - 1.0).abs() < 0.001);
        assert!((percentile(&values, 1.0) - 5.0).abs() < 0.001);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_robust_normalize_handles_outliers() {
        let scores = vec![0.1, 0.2, 0.3, 0.4, 100.0];
        let normalized = robust_normalize(&scores);
        assert_eq!(normalized.len(), 5);
        assert!(normalized.iter().all(|&s| (0.0..=1.0).contains(&s)));
        // The outlier must not push the bulk of the distribution to ~0.
        assert!(normalized[1] > 0.2);
    }

    #[test]
    fn test_robust_normalize_constant_input() {
        let normalized = robust_normalize(&[0.7, 0.7, 0.7]);
        assert!(normalized.iter().all(|&s| (s - 0.5).abs() < 0.001));
    }

    #[test]
    fn test_fuzzy_match() {
        assert!(fuzzy_match("DeFi", "defi"));
        assert!(fuzzy_match("decentralized-finance-defi", "defi"));
        assert!(!fuzzy_match("gaming", "defi"));
        assert!(!fuzzy_match("", "defi"));
    }
}
