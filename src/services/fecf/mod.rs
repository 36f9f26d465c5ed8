pub mod cold_start;
pub mod diversity;
pub mod similarity;
pub mod svd;

use crate::cache::RecommendationCache;
use crate::config::{CacheConfig, FecfConfig};
use crate::data::{FeatureMatrix, ProjectCatalog, UserItemMatrix};
use crate::error::Result;
use crate::models::{RecommendationSource, ScoredItem};
use crate::services::Recommender;
use crate::utils::{fuzzy_match, sort_by_score_desc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use cold_start::ColdStartIndex;
pub use diversity::DiversityReranker;

/// Widest candidate pool handed to diversity re-ranking.
const MAX_CANDIDATE_POOL: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FecfTrainingReport {
    pub training_time_secs: f64,
    pub n_components: usize,
    pub explained_variance: f32,
}

/// Everything the trained model needs to serve; rebuilt on every train run
/// and swapped atomically by replacing the model instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TrainedState {
    pub items: Vec<String>,
    pub item_index: HashMap<String, usize>,
    pub similarity: Array2<f32>,
    pub user_positive: HashMap<String, Vec<(usize, f32)>>,
    pub n_components: usize,
    pub explained_variance: f32,
}

/// Feature-Enhanced Collaborative Filtering: truncated SVD of the
/// interaction matrix blended with content-feature similarity, plus the
/// cold-start machinery for users and items the factorization never saw.
pub struct FecfModel {
    config: FecfConfig,
    cache_config: CacheConfig,
    catalog: Arc<ProjectCatalog>,
    cache: RecommendationCache,
    cold_index: ColdStartIndex,
    state: Option<TrainedState>,
}

impl FecfModel {
    pub fn new(catalog: Arc<ProjectCatalog>, config: FecfConfig, cache_config: CacheConfig) -> Self {
        let cold_index = ColdStartIndex::build(None, &catalog, &config);
        Self {
            cache: RecommendationCache::new(&cache_config),
            config,
            cache_config,
            catalog,
            cold_index,
            state: None,
        }
    }

    pub(crate) fn from_parts(
        catalog: Arc<ProjectCatalog>,
        config: FecfConfig,
        cache_config: CacheConfig,
        state: TrainedState,
        cold_index: Option<ColdStartIndex>,
    ) -> Self {
        let cold_index =
            cold_index.unwrap_or_else(|| ColdStartIndex::build(None, &catalog, &config));
        Self {
            cache: RecommendationCache::new(&cache_config),
            config,
            cache_config,
            catalog,
            cold_index,
            state: Some(state),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_some()
    }

    pub fn config(&self) -> &FecfConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> Option<&TrainedState> {
        self.state.as_ref()
    }

    pub(crate) fn cold_index(&self) -> &ColdStartIndex {
        &self.cold_index
    }

    /// Factorize the interaction matrix and blend in content similarity.
    pub fn train(
        &mut self,
        matrix: &UserItemMatrix,
        features: &FeatureMatrix,
    ) -> Result<FecfTrainingReport> {
        let start = Instant::now();

        let n_components =
            svd::auto_components(matrix.n_users(), matrix.n_items(), self.config.n_components);
        let factorization =
            svd::factorize_items(&matrix.matrix, n_components, self.config.random_seed)?;
        let cf_similarity = similarity::cosine_similarity_matrix(&factorization.item_factors);

        let blended = if features.is_empty() {
            cf_similarity
        } else {
            let content_rows = features.aligned(&matrix.items);
            let content_similarity = similarity::cosine_similarity_matrix(&content_rows);
            similarity::blend_similarity(
                &cf_similarity,
                &content_similarity,
                self.config.content_alpha,
                self.config.category_correlation_weight,
            )
        };

        let user_positive: HashMap<String, Vec<(usize, f32)>> = matrix
            .users
            .iter()
            .map(|user| (user.clone(), matrix.positive_items(user)))
            .collect();

        self.state = Some(TrainedState {
            items: matrix.items.clone(),
            item_index: matrix.item_index.clone(),
            similarity: blended,
            user_positive,
            n_components: factorization.n_components,
            explained_variance: factorization.explained_variance,
        });
        self.cold_index = ColdStartIndex::build(Some(matrix), &self.catalog, &self.config);
        // Retraining invalidates everything cached against the old state.
        self.cache = RecommendationCache::new(&self.cache_config);

        let report = FecfTrainingReport {
            training_time_secs: start.elapsed().as_secs_f64(),
            n_components: factorization.n_components,
            explained_variance: factorization.explained_variance,
        };
        info!(
            n_components = report.n_components,
            explained_variance = report.explained_variance,
            training_time_secs = report.training_time_secs,
            "FECF training complete"
        );
        Ok(report)
    }

    /// Cold-start recommendations, cached per n for the configured TTL.
    pub fn cold_start_recommendations(&self, n: usize) -> Vec<ScoredItem> {
        if n == 0 {
            return Vec::new();
        }
        let key = RecommendationCache::cold_start_key(n);
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }
        let recs = cold_start::cold_start_recommendations(&self.cold_index, &self.catalog, n);
        self.cache.insert(key, recs.clone());
        recs
    }

    /// Cold start guided by free-text interests.
    pub fn interest_based_recommendations(&self, interests: &[String], n: usize) -> Vec<ScoredItem> {
        cold_start::interest_based_recommendations(&self.cold_index, &self.catalog, interests, n)
    }

    /// Similarity-weighted scores over the user's known items; items the
    /// similarity index does not know are skipped rather than failing.
    fn personalized_candidates(
        &self,
        state: &TrainedState,
        known: &[(usize, f32)],
        exclude_known: bool,
    ) -> Vec<ScoredItem> {
        let weight_sum: f32 = known.iter().map(|(_, w)| w).sum();
        if weight_sum <= f32::EPSILON {
            return Vec::new();
        }
        let known_set: HashSet<usize> = known.iter().map(|(i, _)| *i).collect();

        let mut scored: Vec<(usize, f32)> = Vec::with_capacity(state.items.len());
        for candidate in 0..state.items.len() {
            if exclude_known && known_set.contains(&candidate) {
                continue;
            }
            let mut acc = 0.0f32;
            for &(item, weight) in known {
                acc += state.similarity[[candidate, item]] * weight;
            }
            let score = acc / weight_sum;
            if score.is_finite() {
                scored.push((candidate, score));
            }
        }
        sort_by_score_desc(&mut scored);

        scored
            .into_iter()
            .map(|(i, score)| {
                ScoredItem::new(state.items[i].clone(), score, RecommendationSource::Fecf)
            })
            .collect()
    }

    /// Items most similar to a given project. In-model similarity gets
    /// domain bonuses (category, chain, market-cap tier); out-of-model
    /// items fall through the metadata ladder instead of erroring.
    pub fn get_similar_projects(&self, project_id: &str, n: usize) -> Vec<ScoredItem> {
        if n == 0 {
            return Vec::new();
        }
        if let Some(state) = &self.state {
            if let Some(&target) = state.item_index.get(project_id) {
                return self.similar_in_model(state, project_id, target, n);
            }
        }
        if self.catalog.contains(project_id) {
            return self.similar_from_metadata(project_id, n);
        }
        warn!(project_id = %project_id, "Similar-items query for unknown project");
        Vec::new()
    }

    fn similar_in_model(
        &self,
        state: &TrainedState,
        project_id: &str,
        target: usize,
        n: usize,
    ) -> Vec<ScoredItem> {
        let target_project = self.catalog.get(project_id);

        let mut ranked: Vec<(usize, f32)> = (0..state.items.len())
            .filter(|&j| j != target)
            .map(|j| {
                let mut score = state.similarity[[target, j]];
                if let (Some(a), Some(b)) = (target_project, self.catalog.get(&state.items[j])) {
                    if a.categories.iter().any(|c| b.categories.contains(c)) {
                        score += 0.10;
                    }
                    if a.chain == b.chain {
                        score += 0.05;
                    }
                    let (lo, hi) = if a.market_cap <= b.market_cap {
                        (a.market_cap, b.market_cap)
                    } else {
                        (b.market_cap, a.market_cap)
                    };
                    if hi > 0.0 && lo / hi > 0.7 {
                        score += 0.03;
                    }
                }
                (j, score)
            })
            .collect();
        sort_by_score_desc(&mut ranked);

        // Per-attribute representation caps keep one category or chain
        // from filling the whole page.
        let hard_cap = 1.max(n / 2);
        let soft_cap = 1.max(n / 3);
        let mut category_counts: HashMap<String, usize> = HashMap::new();
        let mut chain_counts: HashMap<String, usize> = HashMap::new();
        let mut selected: Vec<ScoredItem> = Vec::with_capacity(n);
        let mut skipped: Vec<ScoredItem> = Vec::new();

        for (j, score) in ranked {
            if selected.len() >= n {
                break;
            }
            let item = ScoredItem::new(state.items[j].clone(), score, RecommendationSource::Fecf);
            if let Some(project) = self.catalog.get(&state.items[j]) {
                let cat = category_counts
                    .get(&project.primary_category)
                    .copied()
                    .unwrap_or(0);
                let chain = chain_counts.get(&project.chain).copied().unwrap_or(0);
                if cat >= hard_cap || chain >= hard_cap || (cat >= soft_cap && chain >= soft_cap) {
                    skipped.push(item);
                    continue;
                }
                *category_counts
                    .entry(project.primary_category.clone())
                    .or_insert(0) += 1;
                *chain_counts.entry(project.chain.clone()).or_insert(0) += 1;
            }
            selected.push(item);
        }

        // Diversity filtering left too few: backfill from the raw ranking.
        for item in skipped {
            if selected.len() >= n {
                break;
            }
            selected.push(item);
        }
        selected
    }

    fn similar_from_metadata(&self, project_id: &str, n: usize) -> Vec<ScoredItem> {
        let Some(target) = self.catalog.get(project_id) else {
            return Vec::new();
        };
        let mut selected: Vec<ScoredItem> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(project_id);

        for project in self.catalog.projects() {
            if selected.len() >= n {
                break;
            }
            if seen.contains(project.id.as_str()) {
                continue;
            }
            if project
                .categories
                .iter()
                .any(|c| target.categories.contains(c))
            {
                seen.insert(project.id.as_str());
                selected.push(ScoredItem::new(
                    project.id.clone(),
                    0.75,
                    RecommendationSource::Fecf,
                ));
            }
        }
        for project in self.catalog.projects() {
            if selected.len() >= n {
                break;
            }
            if seen.contains(project.id.as_str()) {
                continue;
            }
            if project.chain == target.chain {
                seen.insert(project.id.as_str());
                selected.push(ScoredItem::new(
                    project.id.clone(),
                    0.65,
                    RecommendationSource::Fecf,
                ));
            }
        }
        for item in &self.cold_index.popular {
            if selected.len() >= n {
                break;
            }
            if seen.insert(item.project_id.as_str()) {
                selected.push(item.clone());
            }
        }
        // The popular pool only covers the top slice of the catalog, so
        // finish from the full catalog in popularity order.
        if selected.len() < n {
            for project in self.catalog.top_by_popularity(self.catalog.len()) {
                if selected.len() >= n {
                    break;
                }
                if seen.contains(project.id.as_str()) {
                    continue;
                }
                selected.push(ScoredItem::new(
                    project.id.clone(),
                    (project.popularity_score / 100.0).min(1.0),
                    RecommendationSource::Popularity,
                ));
            }
        }
        selected
    }

    pub fn recommendations_by_category(
        &self,
        user_id: &str,
        category: &str,
        n: usize,
        strict: bool,
    ) -> Vec<ScoredItem> {
        self.filtered_recommendations(user_id, Some(category), None, n, strict)
    }

    pub fn recommendations_by_chain(
        &self,
        user_id: &str,
        chain: &str,
        n: usize,
        strict: bool,
    ) -> Vec<ScoredItem> {
        self.filtered_recommendations(user_id, None, Some(chain), n, strict)
    }

    pub fn recommendations_by_category_and_chain(
        &self,
        user_id: &str,
        category: &str,
        chain: &str,
        n: usize,
        strict: bool,
    ) -> Vec<ScoredItem> {
        self.filtered_recommendations(user_id, Some(category), Some(chain), n, strict)
    }

    fn project_matches(&self, project_id: &str, category: Option<&str>, chain: Option<&str>) -> bool {
        let Some(project) = self.catalog.get(project_id) else {
            return false;
        };
        let category_ok = category.map_or(true, |wanted| {
            project.categories.iter().any(|c| fuzzy_match(c, wanted))
                || fuzzy_match(&project.primary_category, wanted)
        });
        let chain_ok = chain.map_or(true, |wanted| fuzzy_match(&project.chain, wanted));
        category_ok && chain_ok
    }

    fn filtered_recommendations(
        &self,
        user_id: &str,
        category: Option<&str>,
        chain: Option<&str>,
        n: usize,
        strict: bool,
    ) -> Vec<ScoredItem> {
        if n == 0 {
            return Vec::new();
        }
        let base = self.recommend_for_user(user_id, n * 3, true);
        let mut matches: Vec<ScoredItem> = base
            .into_iter()
            .filter(|item| self.project_matches(&item.project_id, category, chain))
            .collect();

        if !strict && matches.len() < n / 2 {
            let seen: HashSet<String> = matches.iter().map(|m| m.project_id.clone()).collect();
            let mut backfill: Vec<ScoredItem> = self
                .catalog
                .projects()
                .iter()
                .filter(|p| !seen.contains(&p.id))
                .filter(|p| self.project_matches(&p.id, category, chain))
                .map(|p| {
                    // Non-personalized fill ranked by a trend-boosted base.
                    let score = (0.7 + 0.2 * p.trend_score / 100.0).min(0.9);
                    ScoredItem::new(p.id.clone(), score, RecommendationSource::Popularity)
                })
                .collect();
            backfill.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            matches.extend(backfill);
        }

        if matches.len() > n {
            DiversityReranker::new(&self.catalog).rerank(matches, n, 1.0)
        } else {
            matches
        }
    }
}

impl Recommender for FecfModel {
    fn recommend_for_user(&self, user_id: &str, n: usize, exclude_known: bool) -> Vec<ScoredItem> {
        if n == 0 {
            return Vec::new();
        }
        let Some(state) = &self.state else {
            debug!("FECF untrained, serving cold-start recommendations");
            return self.cold_start_recommendations(n);
        };
        let known = state
            .user_positive
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        if known.is_empty() {
            debug!(user_id = %user_id, "Unknown or empty user, serving cold start");
            return self.cold_start_recommendations(n);
        }

        let key = RecommendationCache::user_key(user_id, n, exclude_known);
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let mut candidates = self.personalized_candidates(state, &known, exclude_known);
        candidates.truncate((n * 3).min(MAX_CANDIDATE_POOL));
        let mut recs = DiversityReranker::new(&self.catalog).rerank(candidates, n, 1.0);

        // A sparse similarity row can leave the pool short; a defined
        // fallback pads the page instead of under-delivering.
        if recs.len() < n {
            let known_ids: HashSet<&str> = known
                .iter()
                .map(|&(i, _)| state.items[i].as_str())
                .collect();
            let seen: HashSet<String> = recs.iter().map(|r| r.project_id.clone()).collect();
            for item in self.cold_start_recommendations(n * 2) {
                if recs.len() >= n {
                    break;
                }
                if seen.contains(&item.project_id) {
                    continue;
                }
                if exclude_known && known_ids.contains(item.project_id.as_str()) {
                    continue;
                }
                recs.push(item);
            }
        }
        recs.truncate(n);

        self.cache.insert(key, recs.clone());
        recs
    }

    fn source(&self) -> RecommendationSource {
        RecommendationSource::Fecf
    }
}
