pub mod evaluation;
pub mod fecf;
pub mod hybrid;
pub mod ncf;

use crate::models::{RecommendationSource, ScoredItem};

pub use evaluation::Evaluator;
pub use fecf::FecfModel;
pub use hybrid::HybridRecommender;
pub use ncf::NcfModel;

/// Uniform recommendation capability implemented by FECF, NCF and the
/// hybrid blender.
///
/// Serving queries are total: unknown users, unknown items and untrained
/// models degrade to a defined fallback (or an empty list) instead of
/// returning an error.
#[cfg_attr(test, mockall::automock)]
pub trait Recommender: Send + Sync {
    /// Ordered (project_id, score) recommendations for a user.
    fn recommend_for_user(&self, user_id: &str, n: usize, exclude_known: bool) -> Vec<ScoredItem>;

    fn source(&self) -> RecommendationSource;
}
