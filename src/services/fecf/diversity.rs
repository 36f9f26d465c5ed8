use crate::data::ProjectCatalog;
use crate::models::{MarketCapTier, Project, ScoredItem};
use std::collections::HashMap;

/// Relative pull of each metadata dimension on the diversity adjustment.
const CATEGORY_WEIGHT: f32 = 0.6;
const CHAIN_WEIGHT: f32 = 0.25;
const CAP_TIER_WEIGHT: f32 = 0.15;

/// Target market-cap mix for a recommendation page.
const TIER_TARGETS: [(MarketCapTier, f32); 3] = [
    (MarketCapTier::High, 0.4),
    (MarketCapTier::Mid, 0.4),
    (MarketCapTier::Low, 0.2),
];

/// Metadata-aware diversity re-ranking.
///
/// Relevance stays dominant: the top fifth of slots is filled purely by
/// score, and the remaining candidates get a dampened nudge (half of the
/// weighted category/chain/cap adjustment) before a greedy cap-respecting
/// fill. Caps are relaxed in a second pass rather than returning fewer
/// than the requested n.
pub struct DiversityReranker<'a> {
    catalog: &'a ProjectCatalog,
}

struct SelectionState {
    category_counts: HashMap<String, usize>,
    chain_counts: HashMap<String, usize>,
    tier_counts: HashMap<MarketCapTier, usize>,
    category_cap: usize,
    chain_cap: usize,
    n: usize,
}

impl SelectionState {
    fn new(n: usize) -> Self {
        Self {
            category_counts: HashMap::new(),
            chain_counts: HashMap::new(),
            tier_counts: HashMap::new(),
            category_cap: 2.max((0.3 * n as f32).ceil() as usize),
            chain_cap: 3.max((0.4 * n as f32).ceil() as usize),
            n,
        }
    }

    fn record(&mut self, project: Option<&Project>) {
        let Some(project) = project else { return };
        for category in &project.categories {
            *self.category_counts.entry(category.clone()).or_insert(0) += 1;
        }
        *self.chain_counts.entry(project.chain.clone()).or_insert(0) += 1;
        *self.tier_counts.entry(project.cap_tier()).or_insert(0) += 1;
    }

    fn violates_caps(&self, project: Option<&Project>) -> bool {
        let Some(project) = project else { return false };
        let category_hit = project.categories.iter().any(|c| {
            self.category_counts.get(c).copied().unwrap_or(0) >= self.category_cap
        });
        let chain_hit =
            self.chain_counts.get(&project.chain).copied().unwrap_or(0) >= self.chain_cap;
        category_hit || chain_hit
    }

    fn adjustment(&self, project: Option<&Project>) -> f32 {
        let Some(project) = project else { return 0.0 };

        let over_represented = project.categories.iter().any(|c| {
            self.category_counts.get(c).copied().unwrap_or(0) >= self.category_cap
        });
        let new_category = project
            .categories
            .iter()
            .any(|c| !self.category_counts.contains_key(c));
        let category_adj = if over_represented {
            -0.3
        } else if new_category {
            0.2
        } else {
            0.0
        };

        let chain_count = self.chain_counts.get(&project.chain).copied().unwrap_or(0);
        let chain_adj = if chain_count >= self.chain_cap {
            -0.2
        } else if chain_count == 0 {
            0.1
        } else {
            0.0
        };

        let tier = project.cap_tier();
        let target = TIER_TARGETS
            .iter()
            .find(|(t, _)| *t == tier)
            .map(|(_, share)| (share * self.n as f32).ceil() as usize)
            .unwrap_or(0);
        let tier_count = self.tier_counts.get(&tier).copied().unwrap_or(0);
        let tier_adj = if tier_count < target { 0.1 } else { -0.1 };

        CATEGORY_WEIGHT * category_adj + CHAIN_WEIGHT * chain_adj + CAP_TIER_WEIGHT * tier_adj
    }
}

impl<'a> DiversityReranker<'a> {
    pub fn new(catalog: &'a ProjectCatalog) -> Self {
        Self { catalog }
    }

    /// Re-rank `candidates` into exactly `min(n, candidates.len())` items.
    /// `strength` scales the metadata nudge (1.0 = the standard half-
    /// strength adjustment; the blender passes its diversity factor).
    pub fn rerank(&self, mut candidates: Vec<ScoredItem>, n: usize, strength: f32) -> Vec<ScoredItem> {
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if candidates.len() <= n {
            return candidates;
        }

        let mut state = SelectionState::new(n);
        let mut selected: Vec<ScoredItem> = Vec::with_capacity(n);

        // Highest-confidence slots are never diversified away.
        let guaranteed = 1.max(n / 5);
        let mut rest: Vec<ScoredItem> = candidates.split_off(guaranteed.min(candidates.len()));
        for item in candidates {
            state.record(self.catalog.get(&item.project_id));
            selected.push(item);
        }

        // Dampened metadata nudge, computed against the guaranteed set.
        let mut adjusted: Vec<(ScoredItem, f32)> = rest
            .drain(..)
            .map(|item| {
                let adj = state.adjustment(self.catalog.get(&item.project_id));
                let score = item.score + 0.5 * strength * adj;
                (item, score)
            })
            .collect();
        adjusted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        // Greedy fill honoring caps.
        let mut deferred: Vec<ScoredItem> = Vec::new();
        for (item, _) in adjusted {
            if selected.len() >= n {
                break;
            }
            let project = self.catalog.get(&item.project_id);
            if state.violates_caps(project) {
                deferred.push(item);
                continue;
            }
            state.record(project);
            selected.push(item);
        }

        // Too few diverse candidates: relax the caps instead of coming up
        // short.
        for item in deferred {
            if selected.len() >= n {
                break;
            }
            selected.push(item);
        }

        selected
    }
}
