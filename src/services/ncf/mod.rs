pub mod network;
pub mod sampler;

use crate::config::NcfConfig;
use crate::data::{ProjectCatalog, UserItemMatrix};
use crate::error::{EngineError, Result};
use crate::models::{RecommendationSource, ScoredItem};
use crate::services::Recommender;
use crate::utils::fuzzy_match;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub use network::NcfNetwork;
pub use sampler::TrainingPool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NcfTrainingReport {
    pub training_time_secs: f64,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub early_stopped: bool,
    pub train_loss: f32,
    pub val_loss: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NcfState {
    pub network: NcfNetwork,
    pub users: Vec<String>,
    pub items: Vec<String>,
    pub user_index: HashMap<String, usize>,
    pub item_index: HashMap<String, usize>,
    pub user_seen: HashMap<String, HashSet<usize>>,
}

/// Neural collaborative filtering model. Scores are probabilities from
/// the network head; unknown users and items always score 0.0 instead
/// of erroring so callers can blend without special cases.
pub struct NcfModel {
    config: NcfConfig,
    catalog: Arc<ProjectCatalog>,
    state: Option<NcfState>,
}

impl NcfModel {
    pub fn new(catalog: Arc<ProjectCatalog>, config: NcfConfig) -> Self {
        Self {
            config,
            catalog,
            state: None,
        }
    }

    pub(crate) fn from_parts(
        catalog: Arc<ProjectCatalog>,
        config: NcfConfig,
        state: NcfState,
    ) -> Self {
        Self {
            config,
            catalog,
            state: Some(state),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_some()
    }

    pub fn config(&self) -> &NcfConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> Option<&NcfState> {
        self.state.as_ref()
    }

    pub fn train(&mut self, matrix: &UserItemMatrix) -> Result<NcfTrainingReport> {
        if matrix.n_users() == 0 || matrix.n_items() == 0 {
            return Err(EngineError::Training(
                "cannot train on an empty interaction matrix".to_string(),
            ));
        }
        let start = Instant::now();

        let pool = TrainingPool::build(
            matrix,
            self.config.negative_ratio,
            self.config.val_ratio,
            self.config.random_seed,
        );
        if pool.train.is_empty() {
            return Err(EngineError::Training(
                "no positive interactions to train on".to_string(),
            ));
        }

        let mut network = NcfNetwork::new(
            matrix.n_users(),
            matrix.n_items(),
            self.config.gmf_dim,
            self.config.mlp_dim,
            &self.config.mlp_layers,
            self.config.dropout,
            self.config.random_seed,
        );
        let mut rng = StdRng::seed_from_u64(self.config.random_seed.wrapping_add(1));
        let (val_users, val_items, val_targets) = sampler::to_batch(&pool.val);

        let mut train_samples = pool.train;
        let mut best_val = f32::INFINITY;
        let mut best_network = network.clone();
        let mut best_epoch = 0usize;
        let mut best_train_loss = f32::INFINITY;
        let mut stalled = 0usize;
        let mut epochs_run = 0usize;
        let mut early_stopped = false;

        for epoch in 0..self.config.epochs {
            epochs_run = epoch + 1;
            train_samples.shuffle(&mut rng);

            let mut epoch_loss = 0.0f32;
            let mut batches = 0usize;
            for chunk in train_samples.chunks(self.config.batch_size) {
                let (users, items, targets) = sampler::to_batch(chunk);
                epoch_loss += network.train_batch(
                    &users,
                    &items,
                    &targets,
                    self.config.learning_rate,
                    &mut rng,
                );
                batches += 1;
            }
            let train_loss = epoch_loss / batches.max(1) as f32;

            let val_loss = if pool.val.is_empty() {
                train_loss
            } else {
                network.evaluate(&val_users, &val_items, &val_targets)
            };
            debug!(epoch, train_loss, val_loss, "NCF epoch complete");

            if val_loss < best_val {
                best_val = val_loss;
                best_network = network.clone();
                best_epoch = epoch;
                best_train_loss = train_loss;
                stalled = 0;
            } else {
                stalled += 1;
                if stalled >= self.config.early_stopping_patience {
                    early_stopped = true;
                    break;
                }
            }
        }

        let user_seen: HashMap<String, HashSet<usize>> = matrix
            .users
            .iter()
            .map(|user| {
                let seen = matrix
                    .positive_items(user)
                    .into_iter()
                    .map(|(i, _)| i)
                    .collect();
                (user.clone(), seen)
            })
            .collect();

        self.state = Some(NcfState {
            network: best_network,
            users: matrix.users.clone(),
            items: matrix.items.clone(),
            user_index: matrix.user_index.clone(),
            item_index: matrix.item_index.clone(),
            user_seen,
        });

        let report = NcfTrainingReport {
            training_time_secs: start.elapsed().as_secs_f64(),
            epochs_run,
            best_epoch,
            early_stopped,
            train_loss: best_train_loss,
            val_loss: best_val,
        };
        info!(
            epochs_run = report.epochs_run,
            best_epoch = report.best_epoch,
            early_stopped = report.early_stopped,
            val_loss = report.val_loss,
            training_time_secs = report.training_time_secs,
            "NCF training complete"
        );
        Ok(report)
    }

    /// Predicted affinity for a single pair, 0.0 when either side is
    /// outside the trained vocabulary.
    pub fn predict(&self, user_id: &str, project_id: &str) -> f32 {
        let Some(state) = &self.state else {
            return 0.0;
        };
        let (Some(&user), Some(&item)) = (
            state.user_index.get(user_id),
            state.item_index.get(project_id),
        ) else {
            return 0.0;
        };
        state.network.predict(&[user], &[item])[0]
    }

    fn popularity_fallback(&self, n: usize) -> Vec<ScoredItem> {
        self.fallback_recommendations(n, None)
    }

    /// Degraded serving path for untrained models and unknown users: a
    /// popularity/trend ranking over the catalog, optionally narrowed to
    /// projects matching the given interest categories.
    pub fn fallback_recommendations(
        &self,
        n: usize,
        interests: Option<&[String]>,
    ) -> Vec<ScoredItem> {
        let matches_interests = |project: &crate::models::Project| {
            interests.map_or(true, |wanted| {
                wanted.iter().any(|interest| {
                    fuzzy_match(&project.primary_category, interest)
                        || project.categories.iter().any(|c| fuzzy_match(c, interest))
                })
            })
        };
        let blended = |project: &crate::models::Project| {
            0.7 * project.popularity_score / 100.0 + 0.3 * project.trend_score / 100.0
        };

        let mut scored: Vec<ScoredItem> = self
            .catalog
            .projects()
            .iter()
            .filter(|p| matches_interests(p))
            .map(|p| ScoredItem::new(p.id.clone(), blended(p), RecommendationSource::Popularity))
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(n);

        // Interest filter too narrow: pad from the unfiltered ranking.
        if scored.len() < n && interests.is_some() {
            let seen: HashSet<&str> = scored.iter().map(|i| i.project_id.as_str()).collect();
            let mut rest: Vec<&crate::models::Project> = self
                .catalog
                .projects()
                .iter()
                .filter(|p| !seen.contains(p.id.as_str()))
                .collect();
            rest.sort_by(|a, b| {
                blended(b)
                    .partial_cmp(&blended(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for project in rest {
                if scored.len() >= n {
                    break;
                }
                scored.push(ScoredItem::new(
                    project.id.clone(),
                    blended(project),
                    RecommendationSource::Popularity,
                ));
            }
        }
        scored
    }
}

impl Recommender for NcfModel {
    fn recommend_for_user(&self, user_id: &str, n: usize, exclude_known: bool) -> Vec<ScoredItem> {
        if n == 0 {
            return Vec::new();
        }
        let Some(state) = &self.state else {
            debug!("NCF untrained, serving popularity fallback");
            return self.popularity_fallback(n);
        };
        let Some(&user) = state.user_index.get(user_id) else {
            debug!(user_id = %user_id, "User unknown to NCF, serving popularity fallback");
            return self.popularity_fallback(n);
        };

        let seen = state.user_seen.get(user_id);
        let candidates: Vec<usize> = (0..state.items.len())
            .filter(|idx| {
                !exclude_known || seen.map_or(true, |s| !s.contains(idx))
            })
            .collect();
        if candidates.is_empty() {
            return self.popularity_fallback(n);
        }

        let mut scored: Vec<ScoredItem> = Vec::with_capacity(candidates.len());
        for chunk in candidates.chunks(self.config.batch_size) {
            let users = vec![user; chunk.len()];
            let preds = state.network.predict(&users, chunk);
            for (&item, &score) in chunk.iter().zip(preds.iter()) {
                scored.push(ScoredItem::new(
                    state.items[item].clone(),
                    score,
                    RecommendationSource::Ncf,
                ));
            }
        }
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(n);
        scored
    }

    fn source(&self) -> RecommendationSource {
        RecommendationSource::Ncf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InteractionStore;
    use crate::models::{Interaction, InteractionKind, Project};
    use chrono::{TimeZone, Utc};

    fn project(id: &str, popularity: f32) -> Project {
        Project {
            id: id.to_string(),
            name: id.to_string(),
            symbol: id.to_uppercase(),
            chain: "ethereum".to_string(),
            primary_category: "defi".to_string(),
            categories: vec!["defi".to_string()],
            current_price: 1.0,
            market_cap: 1e9,
            total_volume: 0.0,
            popularity_score: popularity,
            trend_score: 50.0,
        }
    }

    fn catalog() -> Arc<ProjectCatalog> {
        Arc::new(ProjectCatalog::from_projects(vec![
            project("a", 90.0),
            project("b", 70.0),
            project("c", 50.0),
            project("d", 30.0),
        ]))
    }

    fn matrix() -> UserItemMatrix {
        let mk = |user: &str, item: &str, weight: u8, ts: i64| Interaction {
            user_id: user.to_string(),
            project_id: item.to_string(),
            kind: InteractionKind::Favorite,
            weight,
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
        };
        InteractionStore::from_interactions(vec![
            mk("u1", "a", 8, 1),
            mk("u1", "b", 3, 2),
            mk("u2", "b", 5, 3),
            mk("u2", "c", 7, 4),
            mk("u3", "a", 2, 5),
            mk("u3", "d", 9, 6),
        ])
        .build_matrix()
    }

    fn quick_config() -> NcfConfig {
        NcfConfig {
            gmf_dim: 4,
            mlp_dim: 4,
            mlp_layers: vec![8, 4],
            dropout: 0.0,
            epochs: 3,
            batch_size: 8,
            ..NcfConfig::default()
        }
    }

    #[test]
    fn test_train_then_predict_in_range() {
        let mut model = NcfModel::new(catalog(), quick_config());
        let report = model.train(&matrix()).expect("training succeeds");
        assert!(report.epochs_run >= 1);
        assert!(report.train_loss.is_finite());

        let score = model.predict("u1", "c");
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_unknown_user_or_item_predicts_zero() {
        let mut model = NcfModel::new(catalog(), quick_config());
        model.train(&matrix()).unwrap();
        assert_eq!(model.predict("ghost_user", "a"), 0.0);
        assert_eq!(model.predict("u1", "ghost_item"), 0.0);
    }

    #[test]
    fn test_untrained_predicts_zero() {
        let model = NcfModel::new(catalog(), quick_config());
        assert_eq!(model.predict("u1", "a"), 0.0);
    }

    #[test]
    fn test_recommend_excludes_known_items() {
        let mut model = NcfModel::new(catalog(), quick_config());
        model.train(&matrix()).unwrap();
        let recs = model.recommend_for_user("u1", 4, true);
        assert!(!recs.is_empty());
        assert!(recs.iter().all(|r| r.project_id != "a" && r.project_id != "b"));
    }

    #[test]
    fn test_unknown_user_gets_popularity_fallback() {
        let mut model = NcfModel::new(catalog(), quick_config());
        model.train(&matrix()).unwrap();
        let recs = model.recommend_for_user("ghost_user", 2, true);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].project_id, "a");
        assert_eq!(recs[0].source, RecommendationSource::Popularity);
    }

    fn project_with(id: &str, category: &str, popularity: f32, trend: f32) -> Project {
        Project {
            primary_category: category.to_string(),
            categories: vec![category.to_string()],
            popularity_score: popularity,
            trend_score: trend,
            ..project(id, popularity)
        }
    }

    #[test]
    fn test_fallback_blends_trend_into_ranking() {
        // Equal popularity: the trend component decides the order.
        let catalog = Arc::new(ProjectCatalog::from_projects(vec![
            project_with("steady", "defi", 50.0, 10.0),
            project_with("hot", "defi", 50.0, 90.0),
        ]));
        let model = NcfModel::new(catalog, quick_config());
        let recs = model.recommend_for_user("anyone", 2, true);
        assert_eq!(recs[0].project_id, "hot");
        assert_eq!(recs[1].project_id, "steady");
    }

    #[test]
    fn test_fallback_interest_filter_narrows_then_pads() {
        let catalog = Arc::new(ProjectCatalog::from_projects(vec![
            project_with("blue_chip", "defi", 90.0, 50.0),
            project_with("g1", "gaming", 40.0, 50.0),
            project_with("g2", "gaming", 20.0, 50.0),
        ]));
        let model = NcfModel::new(catalog, quick_config());

        let interests = vec!["gaming".to_string()];
        let recs = model.fallback_recommendations(2, Some(&interests));
        assert_eq!(recs[0].project_id, "g1");
        assert_eq!(recs[1].project_id, "g2");

        // Asking for more than the filter can supply pads from the rest.
        let recs = model.fallback_recommendations(3, Some(&interests));
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[2].project_id, "blue_chip");
    }

    #[test]
    fn test_empty_matrix_training_fails() {
        let mut model = NcfModel::new(catalog(), quick_config());
        let empty = InteractionStore::new().build_matrix();
        assert!(model.train(&empty).is_err());
    }

    #[test]
    fn test_training_deterministic() {
        let mut a = NcfModel::new(catalog(), quick_config());
        let mut b = NcfModel::new(catalog(), quick_config());
        a.train(&matrix()).unwrap();
        b.train(&matrix()).unwrap();
        assert_eq!(a.predict("u1", "c"), b.predict("u1", "c"));
    }
}
