//! Hybrid blender: merges FECF and NCF candidate lists with
//! tier-dependent weights, robust score normalization, a trending
//! boost, diversity re-ranking and a seeded exploration slice.

use crate::config::HybridConfig;
use crate::data::ProjectCatalog;
use crate::models::{BlendStats, RecommendationSource, ScoredItem, UserTier};
use crate::services::fecf::{DiversityReranker, FecfModel};
use crate::services::ncf::NcfModel;
use crate::services::Recommender;
use crate::utils::robust_normalize;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

pub struct HybridRecommender {
    fecf: Arc<FecfModel>,
    ncf: Arc<NcfModel>,
    catalog: Arc<ProjectCatalog>,
    config: HybridConfig,
    user_counts: HashMap<String, usize>,
}

/// Per-candidate ensemble decision. When one model is confident in a
/// score (far from the 0.5 midpoint) and more confident than the other,
/// its normalized score wins outright; ambivalent pairs fall back to
/// the tier-weighted average. A candidate only one model surfaced keeps
/// that model's normalized score and provenance.
fn ensemble_score(
    fecf: Option<f32>,
    ncf: Option<f32>,
    weights: (f32, f32),
    confidence_threshold: f32,
) -> (f32, RecommendationSource) {
    let confidence = |score: f32| (score - 0.5).abs() * 2.0;
    match (fecf, ncf) {
        (Some(f), Some(n)) => {
            let (conf_f, conf_n) = (confidence(f), confidence(n));
            let score = if conf_f >= confidence_threshold && conf_f > conf_n {
                f
            } else if conf_n >= confidence_threshold && conf_n > conf_f {
                n
            } else {
                weights.0 * f + weights.1 * n
            };
            (score, RecommendationSource::Hybrid)
        }
        (Some(f), None) => (f, RecommendationSource::Fecf),
        (None, Some(n)) => (n, RecommendationSource::Ncf),
        (None, None) => (0.0, RecommendationSource::Hybrid),
    }
}

impl HybridRecommender {
    pub fn new(
        fecf: Arc<FecfModel>,
        ncf: Arc<NcfModel>,
        catalog: Arc<ProjectCatalog>,
        config: HybridConfig,
        user_counts: HashMap<String, usize>,
    ) -> Self {
        Self {
            fecf,
            ncf,
            catalog,
            config,
            user_counts,
        }
    }

    pub fn user_tier(&self, user_id: &str) -> UserTier {
        let count = self.user_counts.get(user_id).copied().unwrap_or(0);
        if count < self.config.interaction_threshold_low {
            UserTier::Cold
        } else if count < self.config.interaction_threshold_high {
            UserTier::Medium
        } else {
            UserTier::Rich
        }
    }

    /// (fecf_weight, ncf_weight), normalized to sum to one. The NCF
    /// share is scaled down until the user has enough history for the
    /// network to be trustworthy, and tilted up for rich users.
    fn blend_weights(&self, tier: UserTier, count: usize) -> (f32, f32) {
        let maturity = if self.config.min_ncf_interactions == 0 {
            1.0
        } else {
            (count as f32 / self.config.min_ncf_interactions as f32).min(1.0)
        };
        let mut ncf_w = self.config.ncf_weight * maturity;
        let fecf_w = self.config.fecf_weight;
        if tier == UserTier::Rich {
            ncf_w += 0.1;
        }
        let total = fecf_w + ncf_w;
        if total <= f32::EPSILON {
            (1.0, 0.0)
        } else {
            (fecf_w / total, ncf_w / total)
        }
    }

    /// Items the user has already interacted with, as either model
    /// remembers them.
    fn known_items(&self, user_id: &str) -> HashSet<String> {
        let mut known = HashSet::new();
        if let Some(state) = self.fecf.state() {
            if let Some(positives) = state.user_positive.get(user_id) {
                known.extend(positives.iter().map(|&(i, _)| state.items[i].clone()));
            }
        }
        if let Some(state) = self.ncf.state() {
            if let Some(seen) = state.user_seen.get(user_id) {
                known.extend(seen.iter().map(|&i| state.items[i].clone()));
            }
        }
        known
    }

    /// Per-user deterministic RNG so repeated calls explore identically.
    fn user_rng(&self, user_id: &str) -> StdRng {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        StdRng::seed_from_u64(self.config.random_seed ^ hasher.finish())
    }

    fn apply_trending_boost(&self, items: &mut [ScoredItem]) {
        if self.config.trending_boost_factor <= 0.0 {
            return;
        }
        for item in items.iter_mut() {
            if let Some(project) = self.catalog.get(&item.project_id) {
                if project.trend_score >= 75.0 {
                    item.score += self.config.trending_boost_factor * project.trend_score / 100.0;
                }
            }
        }
    }

    /// Replaces the tail of the page with novelty-weighted picks the
    /// user has not been shown, keeping provenance visible.
    fn inject_exploration(
        &self,
        recs: &mut Vec<ScoredItem>,
        user_id: &str,
        n: usize,
        blocked: &HashSet<String>,
    ) -> usize {
        let slots = ((self.config.explore_ratio * n as f32).floor() as usize).min(recs.len());
        if slots == 0 {
            return 0;
        }
        let selected: HashSet<String> = recs.iter().map(|r| r.project_id.clone()).collect();
        let mut pool: Vec<(&str, f32)> = self
            .catalog
            .projects()
            .iter()
            .filter(|p| !selected.contains(&p.id) && !blocked.contains(&p.id))
            .map(|p| (p.id.as_str(), 1.0 / (1.0 + p.popularity_score)))
            .collect();
        if pool.is_empty() {
            return 0;
        }

        let mut rng = self.user_rng(user_id);
        let mut injected = 0usize;
        let tail_start = recs.len() - slots;
        for slot in 0..slots {
            let total: f32 = pool.iter().map(|(_, w)| w).sum();
            if total <= f32::EPSILON || pool.is_empty() {
                break;
            }
            let mut roll = rng.gen::<f32>() * total;
            let mut picked = pool.len() - 1;
            for (idx, (_, w)) in pool.iter().enumerate() {
                roll -= w;
                if roll <= 0.0 {
                    picked = idx;
                    break;
                }
            }
            let (project_id, _) = pool.swap_remove(picked);
            let replaced_score = recs[tail_start + slot].score;
            recs[tail_start + slot] = ScoredItem::new(
                project_id,
                replaced_score,
                RecommendationSource::Exploration,
            );
            injected += 1;
        }
        injected
    }

    pub fn recommend_with_stats(
        &self,
        user_id: &str,
        n: usize,
        exclude_known: bool,
    ) -> (Vec<ScoredItem>, BlendStats) {
        let mut stats = BlendStats::default();
        if n == 0 {
            return (Vec::new(), stats);
        }
        let tier = self.user_tier(user_id);
        stats.tier = Some(tier);

        // Cold users are served by FECF, which owns the cold-start path.
        // NCF may fill at most the tail share the FECF floor leaves free,
        // so the output stays >= cold_start_fecf_weight FECF-attributable.
        if tier == UserTier::Cold {
            let mut recs = self.fecf.recommend_for_user(user_id, n, exclude_known);
            stats.fecf_candidates = recs.len();
            let ncf_slots = (((1.0 - self.config.cold_start_fecf_weight).max(0.0)) * n as f32)
                .floor() as usize;
            if ncf_slots > 0 && self.ncf.is_trained() {
                let page: HashSet<String> =
                    recs.iter().map(|r| r.project_id.clone()).collect();
                let pool_size = n * self.config.n_candidates_factor.max(1);
                let fill: Vec<ScoredItem> = self
                    .ncf
                    .recommend_for_user(user_id, pool_size, exclude_known)
                    .into_iter()
                    .filter(|item| {
                        item.source == RecommendationSource::Ncf
                            && !page.contains(&item.project_id)
                    })
                    .take(ncf_slots)
                    .collect();
                stats.ncf_candidates = fill.len();
                recs.truncate(n.saturating_sub(fill.len()));
                recs.extend(fill);
            }
            stats.final_count = recs.len();
            return (recs, stats);
        }

        let count = self.user_counts.get(user_id).copied().unwrap_or(0);
        let (fecf_w, ncf_w) = self.blend_weights(tier, count);
        let pool_size = n * self.config.n_candidates_factor.max(1);

        let fecf_list = self.fecf.recommend_for_user(user_id, pool_size, exclude_known);
        let ncf_list = self.ncf.recommend_for_user(user_id, pool_size, exclude_known);
        stats.fecf_candidates = fecf_list.len();
        stats.ncf_candidates = ncf_list.len();
        debug!(
            user_id = %user_id,
            tier = tier.as_str(),
            fecf_weight = fecf_w,
            ncf_weight = ncf_w,
            fecf_candidates = fecf_list.len(),
            ncf_candidates = ncf_list.len(),
            "Blending candidate lists"
        );

        let fecf_norm = robust_normalize(
            &fecf_list.iter().map(|i| i.score).collect::<Vec<f32>>(),
        );
        let ncf_norm = robust_normalize(
            &ncf_list.iter().map(|i| i.score).collect::<Vec<f32>>(),
        );
        let fecf_scores: HashMap<&str, f32> = fecf_list
            .iter()
            .zip(fecf_norm.iter())
            .map(|(item, &score)| (item.project_id.as_str(), score))
            .collect();
        let ncf_scores: HashMap<&str, f32> = ncf_list
            .iter()
            .zip(ncf_norm.iter())
            .map(|(item, &score)| (item.project_id.as_str(), score))
            .collect();

        let mut merged: Vec<ScoredItem> = Vec::with_capacity(fecf_list.len() + ncf_list.len());
        let mut seen: HashSet<&str> = HashSet::new();
        for item in &fecf_list {
            let project_id = item.project_id.as_str();
            seen.insert(project_id);
            let (score, source) = ensemble_score(
                Some(fecf_scores[project_id]),
                ncf_scores.get(project_id).copied(),
                (fecf_w, ncf_w),
                self.config.confidence_threshold,
            );
            merged.push(ScoredItem::new(project_id, score, source));
        }
        for item in &ncf_list {
            let project_id = item.project_id.as_str();
            if seen.contains(project_id) {
                continue;
            }
            let (score, source) = ensemble_score(
                None,
                Some(ncf_scores[project_id]),
                (fecf_w, ncf_w),
                self.config.confidence_threshold,
            );
            merged.push(ScoredItem::new(project_id, score, source));
        }

        self.apply_trending_boost(&mut merged);
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut recs = DiversityReranker::new(&self.catalog).rerank(
            merged,
            n,
            self.config.diversity_factor,
        );
        let blocked = if exclude_known {
            self.known_items(user_id)
        } else {
            HashSet::new()
        };
        stats.exploration_slots = self.inject_exploration(&mut recs, user_id, n, &blocked);
        stats.final_count = recs.len();
        (recs, stats)
    }
}

impl Recommender for HybridRecommender {
    fn recommend_for_user(&self, user_id: &str, n: usize, exclude_known: bool) -> Vec<ScoredItem> {
        self.recommend_with_stats(user_id, n, exclude_known).0
    }

    fn source(&self) -> RecommendationSource {
        RecommendationSource::Hybrid
    }
}
