use crate::config::FecfConfig;
use crate::data::{ProjectCatalog, UserItemMatrix};
use crate::models::{RecommendationSource, ScoredItem};
use crate::services::fecf::diversity::DiversityReranker;
use crate::utils::{fuzzy_match, percentile};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Precomputed candidate pools for users without usable interaction
/// history. Built once per train/load and cached in memory; invalidated
/// only by retraining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdStartIndex {
    /// Popularity pool, sorted by score descending.
    pub popular: Vec<ScoredItem>,
    /// Trend pool, sorted by score descending.
    pub trending: Vec<ScoredItem>,
    pub category_items: HashMap<String, Vec<String>>,
    pub category_distribution: HashMap<String, f32>,
}

impl ColdStartIndex {
    /// Build the pools. With a trained matrix, popularity comes from
    /// interaction counts at or above the configured percentile; before
    /// training it falls back to the collector's popularity score.
    pub fn build(
        matrix: Option<&UserItemMatrix>,
        catalog: &ProjectCatalog,
        config: &FecfConfig,
    ) -> Self {
        let popular = match matrix {
            Some(matrix) if matrix.n_items() > 0 => {
                let counts = matrix.item_interaction_counts();
                let counts_f: Vec<f32> = counts.iter().map(|&c| c as f32).collect();
                let threshold = percentile(&counts_f, config.popular_percentile);
                let max_count = counts_f.iter().cloned().fold(0.0f32, f32::max).max(1.0);

                let mut pool: Vec<ScoredItem> = counts
                    .iter()
                    .enumerate()
                    .filter(|(_, &c)| c > 0 && c as f32 >= threshold)
                    .map(|(i, &c)| {
                        ScoredItem::new(
                            matrix.items[i].clone(),
                            (c as f32 / max_count).min(1.0),
                            RecommendationSource::Popularity,
                        )
                    })
                    .collect();
                pool.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                pool
            }
            _ => catalog
                .top_by_popularity(catalog.len() / 5 + 1)
                .iter()
                .map(|p| {
                    ScoredItem::new(
                        p.id.clone(),
                        (p.popularity_score / 100.0).min(1.0),
                        RecommendationSource::Popularity,
                    )
                })
                .collect(),
        };

        let trending_count = ((catalog.len() as f32 * config.trending_fraction).ceil() as usize).max(1);
        let trending: Vec<ScoredItem> = catalog
            .top_by_trend(trending_count)
            .iter()
            // Trend scores above 100 are a data-quality bug upstream;
            // clamp instead of crashing.
            .map(|p| {
                ScoredItem::new(
                    p.id.clone(),
                    (p.trend_score / 100.0).min(1.0),
                    RecommendationSource::Trending,
                )
            })
            .collect();

        let mut category_items: HashMap<String, Vec<String>> = HashMap::new();
        for project in catalog.projects() {
            for category in &project.categories {
                category_items
                    .entry(category.clone())
                    .or_default()
                    .push(project.id.clone());
            }
        }
        let total: usize = category_items.values().map(|v| v.len()).sum();
        let category_distribution: HashMap<String, f32> = category_items
            .iter()
            .map(|(c, items)| (c.clone(), items.len() as f32 / total.max(1) as f32))
            .collect();

        debug!(
            popular = popular.len(),
            trending = trending.len(),
            categories = category_items.len(),
            "Cold-start pools built"
        );

        Self {
            popular,
            trending,
            category_items,
            category_distribution,
        }
    }
}

/// New-user recommendations: 40% trending, 30% top market cap, the rest
/// popularity-ranked with a per-category flood guard, padded from the
/// catalog so the output is exactly `n` whenever the catalog allows.
pub fn cold_start_recommendations(
    index: &ColdStartIndex,
    catalog: &ProjectCatalog,
    n: usize,
) -> Vec<ScoredItem> {
    let mut selected: Vec<ScoredItem> = Vec::with_capacity(n + 4);
    let mut seen: HashSet<String> = HashSet::new();

    let trending_quota = ((n as f32 * 0.4).ceil() as usize).min(n);
    for item in index.trending.iter().take(trending_quota) {
        let mut item = item.clone();
        if item.score > 0.8 {
            item.score = (item.score * 1.2).min(1.0);
        }
        seen.insert(item.project_id.clone());
        selected.push(item);
    }

    let cap_quota = (n as f32 * 0.3).ceil() as usize;
    for project in catalog.top_by_market_cap(cap_quota + seen.len()) {
        if selected.len() >= trending_quota + cap_quota {
            break;
        }
        if seen.insert(project.id.clone()) {
            selected.push(ScoredItem::new(
                project.id.clone(),
                0.7,
                RecommendationSource::ColdStart,
            ));
        }
    }

    // Popularity fill: once three categories are represented, no category
    // may take more than two slots.
    let mut category_counts: HashMap<String, usize> = HashMap::new();
    for item in &selected {
        if let Some(project) = catalog.get(&item.project_id) {
            *category_counts
                .entry(project.primary_category.clone())
                .or_insert(0) += 1;
        }
    }
    for item in &index.popular {
        if selected.len() >= n {
            break;
        }
        if seen.contains(&item.project_id) {
            continue;
        }
        if let Some(project) = catalog.get(&item.project_id) {
            let count = category_counts
                .get(&project.primary_category)
                .copied()
                .unwrap_or(0);
            if category_counts.len() >= 3 && count >= 2 {
                continue;
            }
            *category_counts
                .entry(project.primary_category.clone())
                .or_insert(0) += 1;
        }
        seen.insert(item.project_id.clone());
        selected.push(item.clone());
    }

    // Fallback ladder: popularity score, then arbitrary catalog order.
    if selected.len() < n {
        for project in catalog.top_by_popularity(catalog.len()) {
            if selected.len() >= n {
                break;
            }
            if seen.insert(project.id.clone()) {
                selected.push(ScoredItem::new(
                    project.id.clone(),
                    (project.popularity_score / 100.0).min(1.0),
                    RecommendationSource::Popularity,
                ));
            }
        }
    }
    if selected.len() < n {
        for project in catalog.projects() {
            if selected.len() >= n {
                break;
            }
            if seen.insert(project.id.clone()) {
                selected.push(ScoredItem::new(
                    project.id.clone(),
                    0.3,
                    RecommendationSource::Popularity,
                ));
            }
        }
    }

    if selected.len() > n {
        DiversityReranker::new(catalog).rerank(selected, n, 1.0)
    } else {
        selected
    }
}

/// Cold start guided by free-text interests: exact substring category
/// matches score 0.85, token-overlap partial matches 0.75 (top three
/// categories), then trending and popular fill.
pub fn interest_based_recommendations(
    index: &ColdStartIndex,
    catalog: &ProjectCatalog,
    interests: &[String],
    n: usize,
) -> Vec<ScoredItem> {
    if interests.is_empty() {
        return cold_start_recommendations(index, catalog, n);
    }

    let per_category_cap = 2.max(n / interests.len().max(1));
    let mut selected: Vec<ScoredItem> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut category_counts: HashMap<String, usize> = HashMap::new();

    let push_from_category = |category: &str,
                                  score: f32,
                                  selected: &mut Vec<ScoredItem>,
                                  seen: &mut HashSet<String>,
                                  category_counts: &mut HashMap<String, usize>| {
        let Some(items) = index.category_items.get(category) else {
            return;
        };
        for project_id in items {
            if selected.len() >= n {
                return;
            }
            let count = category_counts.get(category).copied().unwrap_or(0);
            if count >= per_category_cap {
                return;
            }
            if seen.insert(project_id.clone()) {
                *category_counts.entry(category.to_string()).or_insert(0) += 1;
                selected.push(ScoredItem::new(
                    project_id.clone(),
                    score,
                    RecommendationSource::ColdStart,
                ));
            }
        }
    };

    // Exact substring matches first.
    for interest in interests {
        let categories: Vec<String> = index
            .category_items
            .keys()
            .filter(|c| fuzzy_match(c, interest))
            .cloned()
            .collect();
        for category in categories {
            push_from_category(
                &category,
                0.85,
                &mut selected,
                &mut seen,
                &mut category_counts,
            );
        }
    }

    // Token-overlap partial matches, at most three categories per interest.
    for interest in interests {
        let interest_tokens: HashSet<String> = tokenize(interest);
        let mut partial: Vec<String> = index
            .category_items
            .keys()
            .filter(|c| !fuzzy_match(c, interest))
            .filter(|c| tokenize(c).intersection(&interest_tokens).next().is_some())
            .cloned()
            .collect();
        partial.sort();
        for category in partial.into_iter().take(3) {
            push_from_category(
                &category,
                0.75,
                &mut selected,
                &mut seen,
                &mut category_counts,
            );
        }
    }

    for item in index.trending.iter().chain(index.popular.iter()) {
        if selected.len() >= n {
            break;
        }
        if seen.insert(item.project_id.clone()) {
            selected.push(item.clone());
        }
    }
    if selected.len() < n {
        for project in catalog.projects() {
            if selected.len() >= n {
                break;
            }
            if seen.insert(project.id.clone()) {
                selected.push(ScoredItem::new(
                    project.id.clone(),
                    0.3,
                    RecommendationSource::Popularity,
                ));
            }
        }
    }

    if selected.len() > n {
        DiversityReranker::new(catalog).rerank(selected, n, 1.0)
    } else {
        selected
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_' || c == '/')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}
