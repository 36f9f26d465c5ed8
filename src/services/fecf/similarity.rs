use ndarray::Array2;

/// Cosine similarity between every pair of rows. Zero rows get zero
/// similarity to everything; nonzero rows get an exact 1.0 self-similarity.
pub fn cosine_similarity_matrix(rows: &Array2<f32>) -> Array2<f32> {
    let n = rows.nrows();
    let mut normalized = rows.clone();
    let mut nonzero = vec![false; n];
    for (i, mut row) in normalized.rows_mut().into_iter().enumerate() {
        let norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            nonzero[i] = true;
            row.mapv_inplace(|v| v / norm);
        }
    }

    let mut similarity = normalized.dot(&normalized.t());
    for i in 0..n {
        similarity[[i, i]] = if nonzero[i] { 1.0 } else { 0.0 };
    }
    similarity
}

/// Blend factorization similarity with content similarity:
/// `alpha*cf + (1-alpha)*content` wherever content similarity is nonzero,
/// plain factorization similarity elsewhere. Alpha is clamped to
/// [0.3, 0.7] and nudged down when the category correlation weight is
/// high, giving content features more pull for category-heavy domains.
pub fn blend_similarity(
    cf_similarity: &Array2<f32>,
    content_similarity: &Array2<f32>,
    content_alpha: f32,
    category_correlation_weight: f32,
) -> Array2<f32> {
    let alpha = effective_alpha(content_alpha, category_correlation_weight);
    let mut blended = cf_similarity.clone();
    for ((i, j), value) in blended.indexed_iter_mut() {
        let content = content_similarity[[i, j]];
        if content.abs() > f32::EPSILON {
            *value = alpha * *value + (1.0 - alpha) * content;
        }
    }
    blended
}

pub fn effective_alpha(content_alpha: f32, category_correlation_weight: f32) -> f32 {
    let mut alpha = content_alpha.clamp(0.3, 0.7);
    if category_correlation_weight >= 0.5 {
        alpha = (alpha - 0.1).max(0.3);
    }
    alpha
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cosine_symmetry_and_diagonal() {
        let rows = array![[1.0, 2.0], [3.0, 1.0], [0.0, 0.0]];
        let sim = cosine_similarity_matrix(&rows);

        for i in 0..3 {
            for j in 0..3 {
                assert!(
                    (sim[[i, j]] - sim[[j, i]]).abs() < 1e-6,
                    "similarity must be symmetric"
                );
            }
        }
        assert_eq!(sim[[0, 0]], 1.0);
        assert_eq!(sim[[1, 1]], 1.0);
        // Zero row: no similarity signal, including to itself.
        assert_eq!(sim[[2, 2]], 0.0);
        assert_eq!(sim[[0, 2]], 0.0);
    }

    #[test]
    fn test_cosine_bounds() {
        let rows = array![[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0]];
        let sim = cosine_similarity_matrix(&rows);
        assert!((sim[[0, 1]] - -1.0).abs() < 1e-6);
        assert!(sim.iter().all(|&v| (-1.0 - 1e-6..=1.0 + 1e-6).contains(&v)));
    }

    #[test]
    fn test_blend_only_where_content_nonzero() {
        let cf = array![[1.0, 0.8], [0.8, 1.0]];
        let content = array![[1.0, 0.0], [0.0, 1.0]];
        let blended = blend_similarity(&cf, &content, 0.5, 0.0);

        // Content is zero off-diagonal, so the cf value survives untouched.
        assert!((blended[[0, 1]] - 0.8).abs() < 1e-6);
        // Diagonal blends toward content (both 1.0, so unchanged).
        assert!((blended[[0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_effective_alpha_clamp_and_nudge() {
        assert!((effective_alpha(0.9, 0.0) - 0.7).abs() < 1e-6);
        assert!((effective_alpha(0.1, 0.0) - 0.3).abs() < 1e-6);
        assert!((effective_alpha(0.6, 0.6) - 0.5).abs() < 1e-6);
        assert!((effective_alpha(0.3, 0.9) - 0.3).abs() < 1e-6);
    }
}
