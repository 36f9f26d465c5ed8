use serde::Deserialize;
use std::env;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub fecf: FecfConfig,
    pub ncf: NcfConfig,
    pub hybrid: HybridConfig,
    pub evaluation: EvaluationConfig,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            fecf: FecfConfig::default(),
            ncf: NcfConfig::default(),
            hybrid: HybridConfig::default(),
            evaluation: EvaluationConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub projects_path: String,
    pub interactions_path: String,
    pub features_path: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            projects_path: "data/projects.csv".to_string(),
            interactions_path: "data/interactions.csv".to_string(),
            features_path: "data/features.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FecfConfig {
    /// Explicit latent dimension; 0 = auto-size from the matrix shape.
    pub n_components: usize,
    /// Mixing coefficient between factorization and content similarity.
    pub content_alpha: f32,
    /// Domain-tuning knob; high values nudge content_alpha down.
    pub category_correlation_weight: f32,
    pub random_seed: u64,
    /// Percentile of interaction counts above which an item is "popular".
    pub popular_percentile: f32,
    /// Fraction of the catalog considered "trending" by trend score.
    pub trending_fraction: f32,
}

impl Default for FecfConfig {
    fn default() -> Self {
        Self {
            n_components: 0,
            content_alpha: 0.5,
            category_correlation_weight: 0.4,
            random_seed: 42,
            popular_percentile: 0.8,
            trending_fraction: 0.15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NcfConfig {
    pub gmf_dim: usize,
    pub mlp_dim: usize,
    /// Hidden layer widths of the MLP tower.
    pub mlp_layers: Vec<usize>,
    pub dropout: f32,
    pub learning_rate: f32,
    pub batch_size: usize,
    pub epochs: usize,
    pub early_stopping_patience: usize,
    /// Negative samples synthesized per positive example.
    pub negative_ratio: usize,
    pub val_ratio: f32,
    pub random_seed: u64,
}

impl Default for NcfConfig {
    fn default() -> Self {
        Self {
            gmf_dim: 16,
            mlp_dim: 16,
            mlp_layers: vec![64, 32, 16],
            dropout: 0.2,
            learning_rate: 0.001,
            batch_size: 256,
            epochs: 30,
            early_stopping_patience: 5,
            negative_ratio: 4,
            val_ratio: 0.2,
            random_seed: 42,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HybridConfig {
    pub ncf_weight: f32,
    pub fecf_weight: f32,
    /// Positive-interaction counts bounding the cold / medium / rich tiers.
    pub interaction_threshold_low: usize,
    pub interaction_threshold_high: usize,
    /// FECF share of output for cold-tier users.
    pub cold_start_fecf_weight: f32,
    /// Interactions needed before NCF gets its full base weight.
    pub min_ncf_interactions: usize,
    /// Confidence margin for the selective ensemble.
    pub confidence_threshold: f32,
    /// Candidate pool width multiplier over the requested n.
    pub n_candidates_factor: usize,
    pub diversity_factor: f32,
    pub trending_boost_factor: f32,
    pub explore_ratio: f32,
    pub random_seed: u64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            ncf_weight: 0.5,
            fecf_weight: 0.5,
            interaction_threshold_low: 10,
            interaction_threshold_high: 30,
            cold_start_fecf_weight: 0.95,
            min_ncf_interactions: 20,
            confidence_threshold: 0.3,
            n_candidates_factor: 3,
            diversity_factor: 1.0,
            trending_boost_factor: 0.05,
            explore_ratio: 0.3,
            random_seed: 42,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    pub k_values: Vec<usize>,
    /// Temporal split when true, seeded random split otherwise.
    pub temporal_split: bool,
    pub test_ratio: f32,
    pub max_test_users: usize,
    pub cold_start_trials: usize,
    /// Top popularity percentile excluded from cold-start test items.
    pub cold_start_exclude_percentile: f32,
    pub random_seed: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            k_values: vec![5, 10, 20],
            temporal_split: true,
            test_ratio: 0.3,
            max_test_users: 500,
            cold_start_trials: 5,
            cold_start_exclude_percentile: 0.1,
            random_seed: 42,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_entries: 10_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            data: DataConfig {
                projects_path: env_or("PROJECTS_PATH", "data/projects.csv"),
                interactions_path: env_or("INTERACTIONS_PATH", "data/interactions.csv"),
                features_path: env_or("FEATURES_PATH", "data/features.csv"),
            },
            fecf: FecfConfig {
                n_components: env_or("FECF_N_COMPONENTS", "0")
                    .parse()
                    .expect("FECF_N_COMPONENTS must be a valid usize"),
                content_alpha: env_or("FECF_CONTENT_ALPHA", "0.5")
                    .parse()
                    .expect("FECF_CONTENT_ALPHA must be a valid f32"),
                category_correlation_weight: env_or("FECF_CATEGORY_WEIGHT", "0.4")
                    .parse()
                    .expect("FECF_CATEGORY_WEIGHT must be a valid f32"),
                random_seed: env_or("FECF_RANDOM_SEED", "42")
                    .parse()
                    .expect("FECF_RANDOM_SEED must be a valid u64"),
                popular_percentile: env_or("FECF_POPULAR_PERCENTILE", "0.8")
                    .parse()
                    .expect("FECF_POPULAR_PERCENTILE must be a valid f32"),
                trending_fraction: env_or("FECF_TRENDING_FRACTION", "0.15")
                    .parse()
                    .expect("FECF_TRENDING_FRACTION must be a valid f32"),
            },
            ncf: NcfConfig {
                gmf_dim: env_or("NCF_GMF_DIM", "16")
                    .parse()
                    .expect("NCF_GMF_DIM must be a valid usize"),
                mlp_dim: env_or("NCF_MLP_DIM", "16")
                    .parse()
                    .expect("NCF_MLP_DIM must be a valid usize"),
                mlp_layers: env_or("NCF_MLP_LAYERS", "64,32,16")
                    .split(',')
                    .map(|s| s.trim().parse().expect("NCF_MLP_LAYERS must be usizes"))
                    .collect(),
                dropout: env_or("NCF_DROPOUT", "0.2")
                    .parse()
                    .expect("NCF_DROPOUT must be a valid f32"),
                learning_rate: env_or("NCF_LEARNING_RATE", "0.001")
                    .parse()
                    .expect("NCF_LEARNING_RATE must be a valid f32"),
                batch_size: env_or("NCF_BATCH_SIZE", "256")
                    .parse()
                    .expect("NCF_BATCH_SIZE must be a valid usize"),
                epochs: env_or("NCF_EPOCHS", "30")
                    .parse()
                    .expect("NCF_EPOCHS must be a valid usize"),
                early_stopping_patience: env_or("NCF_PATIENCE", "5")
                    .parse()
                    .expect("NCF_PATIENCE must be a valid usize"),
                negative_ratio: env_or("NCF_NEGATIVE_RATIO", "4")
                    .parse()
                    .expect("NCF_NEGATIVE_RATIO must be a valid usize"),
                val_ratio: env_or("NCF_VAL_RATIO", "0.2")
                    .parse()
                    .expect("NCF_VAL_RATIO must be a valid f32"),
                random_seed: env_or("NCF_RANDOM_SEED", "42")
                    .parse()
                    .expect("NCF_RANDOM_SEED must be a valid u64"),
            },
            hybrid: HybridConfig {
                ncf_weight: env_or("HYBRID_NCF_WEIGHT", "0.5")
                    .parse()
                    .expect("HYBRID_NCF_WEIGHT must be a valid f32"),
                fecf_weight: env_or("HYBRID_FECF_WEIGHT", "0.5")
                    .parse()
                    .expect("HYBRID_FECF_WEIGHT must be a valid f32"),
                interaction_threshold_low: env_or("HYBRID_THRESHOLD_LOW", "10")
                    .parse()
                    .expect("HYBRID_THRESHOLD_LOW must be a valid usize"),
                interaction_threshold_high: env_or("HYBRID_THRESHOLD_HIGH", "30")
                    .parse()
                    .expect("HYBRID_THRESHOLD_HIGH must be a valid usize"),
                cold_start_fecf_weight: env_or("HYBRID_COLD_FECF_WEIGHT", "0.95")
                    .parse()
                    .expect("HYBRID_COLD_FECF_WEIGHT must be a valid f32"),
                min_ncf_interactions: env_or("HYBRID_MIN_NCF_INTERACTIONS", "20")
                    .parse()
                    .expect("HYBRID_MIN_NCF_INTERACTIONS must be a valid usize"),
                confidence_threshold: env_or("HYBRID_CONFIDENCE_THRESHOLD", "0.3")
                    .parse()
                    .expect("HYBRID_CONFIDENCE_THRESHOLD must be a valid f32"),
                n_candidates_factor: env_or("HYBRID_CANDIDATES_FACTOR", "3")
                    .parse()
                    .expect("HYBRID_CANDIDATES_FACTOR must be a valid usize"),
                diversity_factor: env_or("HYBRID_DIVERSITY_FACTOR", "1.0")
                    .parse()
                    .expect("HYBRID_DIVERSITY_FACTOR must be a valid f32"),
                trending_boost_factor: env_or("HYBRID_TRENDING_BOOST", "0.05")
                    .parse()
                    .expect("HYBRID_TRENDING_BOOST must be a valid f32"),
                explore_ratio: env_or("HYBRID_EXPLORE_RATIO", "0.3")
                    .parse()
                    .expect("HYBRID_EXPLORE_RATIO must be a valid f32"),
                random_seed: env_or("HYBRID_RANDOM_SEED", "42")
                    .parse()
                    .expect("HYBRID_RANDOM_SEED must be a valid u64"),
            },
            evaluation: EvaluationConfig {
                k_values: env_or("EVAL_K_VALUES", "5,10,20")
                    .split(',')
                    .map(|s| s.trim().parse().expect("EVAL_K_VALUES must be usizes"))
                    .collect(),
                temporal_split: env_or("EVAL_TEMPORAL_SPLIT", "true")
                    .parse()
                    .expect("EVAL_TEMPORAL_SPLIT must be a valid bool"),
                test_ratio: env_or("EVAL_TEST_RATIO", "0.3")
                    .parse()
                    .expect("EVAL_TEST_RATIO must be a valid f32"),
                max_test_users: env_or("EVAL_MAX_TEST_USERS", "500")
                    .parse()
                    .expect("EVAL_MAX_TEST_USERS must be a valid usize"),
                cold_start_trials: env_or("EVAL_COLD_START_TRIALS", "5")
                    .parse()
                    .expect("EVAL_COLD_START_TRIALS must be a valid usize"),
                cold_start_exclude_percentile: env_or("EVAL_COLD_START_EXCLUDE", "0.1")
                    .parse()
                    .expect("EVAL_COLD_START_EXCLUDE must be a valid f32"),
                random_seed: env_or("EVAL_RANDOM_SEED", "42")
                    .parse()
                    .expect("EVAL_RANDOM_SEED must be a valid u64"),
            },
            cache: CacheConfig {
                ttl_secs: env_or("CACHE_TTL_SECS", "3600")
                    .parse()
                    .expect("CACHE_TTL_SECS must be a valid u64"),
                max_entries: env_or("CACHE_MAX_ENTRIES", "10000")
                    .parse()
                    .expect("CACHE_MAX_ENTRIES must be a valid u64"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = Config::default();
        assert!(config.hybrid.interaction_threshold_low < config.hybrid.interaction_threshold_high);
        assert!((config.hybrid.ncf_weight + config.hybrid.fecf_weight - 1.0).abs() < 1e-6);
        assert!(config.ncf.val_ratio > 0.0 && config.ncf.val_ratio < 1.0);
        assert_eq!(config.evaluation.k_values, vec![5, 10, 20]);
    }
}
