use crate::config::CacheConfig;
use crate::models::ScoredItem;
use moka::sync::Cache;
use std::time::Duration;

/// TTL-bounded recommendation cache owned by each model instance.
///
/// Stale reads inside the TTL are an accepted tradeoff for latency;
/// retraining swaps in a new model (and a fresh cache) rather than
/// invalidating entries in place.
#[derive(Clone)]
pub struct RecommendationCache {
    inner: Cache<String, Vec<ScoredItem>>,
}

impl RecommendationCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(Duration::from_secs(config.ttl_secs))
                .build(),
        }
    }

    pub fn user_key(user_id: &str, n: usize, exclude_known: bool) -> String {
        format!("user:{}:{}:{}", user_id, n, exclude_known)
    }

    pub fn cold_start_key(n: usize) -> String {
        format!("cold_start:{}", n)
    }

    pub fn get(&self, key: &str) -> Option<Vec<ScoredItem>> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: String, items: Vec<ScoredItem>) {
        self.inner.insert(key, items);
    }
}
