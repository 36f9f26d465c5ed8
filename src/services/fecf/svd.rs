use crate::error::{EngineError, Result};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Subspace iterations; enough for the similarity use case, where only the
/// dominant directions matter.
const POWER_ITERATIONS: usize = 30;

#[derive(Debug)]
pub struct SvdResult {
    /// Items x n_components factor matrix (U_k * S_k).
    pub item_factors: Array2<f32>,
    pub explained_variance: f32,
    pub n_components: usize,
}

/// Auto-size the latent dimension: 10% of the smaller matrix dimension,
/// capped at 100, floored at 16, never above the smaller dimension itself.
pub fn auto_components(n_users: usize, n_items: usize, configured: usize) -> usize {
    let min_dim = n_users.min(n_items).max(1);
    if configured > 0 {
        return configured.min(min_dim);
    }
    (min_dim / 10).min(100).max(16).min(min_dim)
}

/// Truncated SVD of the item x user transpose of the interaction matrix,
/// computed as a seeded randomized subspace iteration on the item Gram
/// matrix. Deterministic under a fixed seed, which the reproducibility
/// contract requires.
pub fn factorize_items(matrix: &Array2<f32>, n_components: usize, seed: u64) -> Result<SvdResult> {
    let n_users = matrix.nrows();
    let n_items = matrix.ncols();
    if n_users == 0 || n_items == 0 {
        return Err(EngineError::Training(
            "interaction matrix is empty".to_string(),
        ));
    }
    let k = n_components.min(n_users.min(n_items)).max(1);

    // Item Gram matrix G = A^T A; its eigenvectors are the left singular
    // vectors of A^T and its eigenvalues the squared singular values.
    let gram = matrix.t().dot(matrix);
    let total_variance: f32 = (0..n_items).map(|i| gram[[i, i]]).sum();
    if total_variance <= f32::EPSILON {
        return Err(EngineError::Training(
            "no positive interactions to factorize".to_string(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut basis = Array2::<f32>::zeros((n_items, k));
    for value in basis.iter_mut() {
        *value = rng.gen_range(-0.5..0.5);
    }
    orthonormalize(&mut basis);

    for _ in 0..POWER_ITERATIONS {
        basis = gram.dot(&basis);
        orthonormalize(&mut basis);
    }

    // Rayleigh quotients give the eigenvalue estimates for each direction.
    let projected = gram.dot(&basis);
    let mut eigenvalues: Vec<(usize, f32)> = (0..k)
        .map(|j| {
            let value: f32 = basis.column(j).dot(&projected.column(j));
            (j, value.max(0.0))
        })
        .collect();
    eigenvalues.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut item_factors = Array2::<f32>::zeros((n_items, k));
    let mut captured = 0.0f32;
    for (out, &(j, eigenvalue)) in eigenvalues.iter().enumerate() {
        captured += eigenvalue;
        let scale = eigenvalue.sqrt();
        for i in 0..n_items {
            item_factors[[i, out]] = basis[[i, j]] * scale;
        }
    }

    Ok(SvdResult {
        item_factors,
        explained_variance: (captured / total_variance).min(1.0),
        n_components: k,
    })
}

/// Modified Gram-Schmidt. Columns that collapse below tolerance (rank
/// deficiency) are zeroed rather than amplified.
fn orthonormalize(basis: &mut Array2<f32>) {
    let k = basis.ncols();
    for j in 0..k {
        for prev in 0..j {
            let projection: f32 = basis.column(j).dot(&basis.column(prev));
            let prev_col: Array1<f32> = basis.column(prev).to_owned();
            for (value, &p) in basis.column_mut(j).iter_mut().zip(prev_col.iter()) {
                *value -= projection * p;
            }
        }
        let norm: f32 = basis.column(j).dot(&basis.column(j)).sqrt();
        if norm > 1e-8 {
            basis.column_mut(j).mapv_inplace(|v| v / norm);
        } else {
            basis.column_mut(j).fill(0.0);
        }
    }
}
