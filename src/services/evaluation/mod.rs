pub mod metrics;

use crate::config::EvaluationConfig;
use crate::data::{InteractionStore, UserItemMatrix};
use crate::error::{EngineError, Result};
use crate::services::fecf::FecfModel;
use crate::services::Recommender;
use crate::utils::percentile;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

/// Train portion plus per-user held-out relevant sets.
#[derive(Debug)]
pub struct TestSplit {
    pub train: InteractionStore,
    pub test: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelMetrics {
    pub precision: BTreeMap<usize, f32>,
    pub recall: BTreeMap<usize, f32>,
    pub ndcg: BTreeMap<usize, f32>,
    pub map: BTreeMap<usize, f32>,
    pub hit_ratio: BTreeMap<usize, f32>,
    pub mrr: f32,
    pub evaluated_users: usize,
    pub error: Option<String>,
}

impl ModelMetrics {
    fn zeroed_with_error(k_values: &[usize], error: String) -> Self {
        let zeros: BTreeMap<usize, f32> = k_values.iter().map(|&k| (k, 0.0)).collect();
        Self {
            precision: zeros.clone(),
            recall: zeros.clone(),
            ndcg: zeros.clone(),
            map: zeros.clone(),
            hit_ratio: zeros,
            mrr: 0.0,
            evaluated_users: 0,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColdStartMetrics {
    pub trials: usize,
    pub mean_precision: f32,
    pub std_precision: f32,
    pub mean_recall: f32,
    pub std_recall: f32,
    pub mean_ndcg: f32,
    pub std_ndcg: f32,
    pub mean_map: f32,
    pub std_map: f32,
    pub mean_mrr: f32,
    pub std_mrr: f32,
    pub mean_hit_ratio: f32,
    pub std_hit_ratio: f32,
}

/// Offline evaluation harness for anything implementing `Recommender`.
pub struct Evaluator {
    config: EvaluationConfig,
}

impl Evaluator {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    /// Splits the log into train and held-out test sets.
    ///
    /// The temporal split holds out each user's interactions after the
    /// global 70th-percentile timestamp; users with fewer than two items
    /// on the test side fall back to holding out their most recent
    /// `test_ratio` share. The random split shuffles per user instead.
    pub fn build_split(&self, store: &InteractionStore) -> Result<TestSplit> {
        if store.is_empty() {
            return Err(EngineError::Data(
                "cannot build an evaluation split from an empty log".to_string(),
            ));
        }

        let mut per_user: HashMap<String, Vec<&crate::models::Interaction>> = HashMap::new();
        for interaction in store.interactions() {
            per_user
                .entry(interaction.user_id.clone())
                .or_default()
                .push(interaction);
        }

        let timestamps: Vec<f32> = store
            .interactions()
            .iter()
            .map(|i| i.timestamp.timestamp() as f32)
            .collect();
        let threshold = percentile(&timestamps, 0.7);

        let mut train: Vec<crate::models::Interaction> = Vec::new();
        let mut train_counts: HashMap<String, usize> = HashMap::new();
        let mut test: HashMap<String, HashSet<String>> = HashMap::new();
        let mut rng = StdRng::seed_from_u64(self.config.random_seed);

        // Users in id order so the seeded RNG is consumed reproducibly.
        let mut per_user: Vec<(String, Vec<&crate::models::Interaction>)> =
            per_user.into_iter().collect();
        per_user.sort_by(|a, b| a.0.cmp(&b.0));

        for (user, mut events) in per_user {
            events.sort_by_key(|i| i.timestamp);
            if events.len() < 2 {
                // Not enough history to both train on and hold out.
                train.extend(events.into_iter().cloned());
                continue;
            }

            let held: Vec<usize> = if self.config.temporal_split {
                let after: Vec<usize> = events
                    .iter()
                    .enumerate()
                    .filter(|(_, i)| i.timestamp.timestamp() as f32 > threshold)
                    .map(|(idx, _)| idx)
                    .collect();
                if after.len() >= 2 && after.len() < events.len() {
                    after
                } else {
                    // Temporal cut degenerate for this user: hold out the
                    // most recent test_ratio share instead.
                    let held_count = (((events.len() as f32) * self.config.test_ratio).ceil()
                        as usize)
                        .max(1)
                        .min(events.len() - 1);
                    (events.len() - held_count..events.len()).collect()
                }
            } else {
                let mut order: Vec<usize> = (0..events.len()).collect();
                order.shuffle(&mut rng);
                let held_count = (((events.len() as f32) * self.config.test_ratio).ceil()
                    as usize)
                    .max(1)
                    .min(events.len() - 1);
                order.truncate(held_count);
                order
            };

            let held_set: HashSet<usize> = held.iter().copied().collect();
            let mut relevant: HashSet<String> = HashSet::new();
            for (idx, event) in events.iter().enumerate() {
                if held_set.contains(&idx) {
                    relevant.insert(event.project_id.clone());
                } else {
                    train.push((*event).clone());
                    *train_counts.entry(user.clone()).or_insert(0) += 1;
                }
            }
            if !relevant.is_empty() {
                test.insert(user, relevant);
            }
        }

        let test = self.cap_test_users(test, &train_counts, &mut rng);
        info!(
            train_interactions = train.len(),
            test_users = test.len(),
            temporal = self.config.temporal_split,
            "Evaluation split built"
        );
        Ok(TestSplit {
            train: InteractionStore::from_interactions(train),
            test,
        })
    }

    /// Caps the test population, sampling from low, mid and high activity
    /// buckets (by train-side interaction count) so heavy users do not
    /// dominate the report. The sparse bucket gets a boosted quota; any
    /// budget those buckets cannot fill rolls over in activity order.
    fn cap_test_users(
        &self,
        test: HashMap<String, HashSet<String>>,
        train_counts: &HashMap<String, usize>,
        rng: &mut StdRng,
    ) -> HashMap<String, HashSet<String>> {
        let cap = self.config.max_test_users;
        if test.len() <= cap {
            return test;
        }
        let mut by_activity: Vec<(String, usize)> = test
            .keys()
            .map(|user| (user.clone(), train_counts.get(user).copied().unwrap_or(0)))
            .collect();
        by_activity.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let bucket_size = by_activity.len().div_ceil(3);
        let quotas = [
            (cap as f32 * 0.4).ceil() as usize,
            (cap as f32 * 0.3).ceil() as usize,
            cap,
        ];
        let mut kept: HashSet<String> = HashSet::new();
        for (bucket, &quota) in by_activity.chunks(bucket_size).zip(quotas.iter()) {
            let mut users: Vec<&String> = bucket.iter().map(|(u, _)| u).collect();
            users.shuffle(rng);
            for user in users.into_iter().take(quota) {
                if kept.len() >= cap {
                    break;
                }
                kept.insert(user.clone());
            }
        }
        for (user, _) in &by_activity {
            if kept.len() >= cap {
                break;
            }
            kept.insert(user.clone());
        }

        test.into_iter()
            .filter(|(user, _)| kept.contains(user))
            .collect()
    }

    /// Mean ranking metrics over all test users, evaluated in parallel.
    pub fn evaluate(&self, model: &dyn Recommender, split: &TestSplit) -> Result<ModelMetrics> {
        if split.test.is_empty() {
            return Err(EngineError::Data(
                "evaluation split has no test users".to_string(),
            ));
        }
        let max_k = self.config.k_values.iter().copied().max().unwrap_or(10);
        let users: Vec<(&String, &HashSet<String>)> = split.test.iter().collect();

        #[derive(Default)]
        struct Accum {
            per_k: BTreeMap<usize, [f32; 5]>,
            mrr: f32,
            users: usize,
        }

        let merged = users
            .par_iter()
            .map(|(user, relevant)| {
                let recommended: Vec<String> = model
                    .recommend_for_user(user, max_k, true)
                    .into_iter()
                    .map(|item| item.project_id)
                    .collect();
                let mut acc = Accum {
                    users: 1,
                    mrr: metrics::mrr(&recommended, relevant),
                    per_k: BTreeMap::new(),
                };
                for &k in &self.config.k_values {
                    acc.per_k.insert(
                        k,
                        [
                            metrics::precision_at_k(&recommended, relevant, k),
                            metrics::recall_at_k(&recommended, relevant, k),
                            metrics::ndcg_at_k(&recommended, relevant, k),
                            metrics::map_at_k(&recommended, relevant, k),
                            metrics::hit_ratio_at_k(&recommended, relevant, k),
                        ],
                    );
                }
                acc
            })
            .reduce(Accum::default, |mut a, b| {
                a.mrr += b.mrr;
                a.users += b.users;
                for (k, values) in b.per_k {
                    let entry = a.per_k.entry(k).or_insert([0.0; 5]);
                    for (slot, value) in entry.iter_mut().zip(values) {
                        *slot += value;
                    }
                }
                a
            });

        let n = merged.users.max(1) as f32;
        let mut result = ModelMetrics {
            mrr: merged.mrr / n,
            evaluated_users: merged.users,
            ..ModelMetrics::default()
        };
        for (k, sums) in merged.per_k {
            result.precision.insert(k, sums[0] / n);
            result.recall.insert(k, sums[1] / n);
            result.ndcg.insert(k, sums[2] / n);
            result.map.insert(k, sums[3] / n);
            result.hit_ratio.insert(k, sums[4] / n);
        }
        Ok(result)
    }

    /// Evaluates several models against the same split. A model that
    /// fails is reported with zeroed metrics and the error message
    /// rather than aborting the whole comparison.
    pub fn evaluate_all(
        &self,
        models: &[(&str, &dyn Recommender)],
        split: &TestSplit,
    ) -> HashMap<String, ModelMetrics> {
        models
            .iter()
            .map(|(name, model)| {
                let result = match self.evaluate(*model, split) {
                    Ok(metrics) => metrics,
                    Err(e) => {
                        warn!(model = *name, error = %e, "Model evaluation failed");
                        ModelMetrics::zeroed_with_error(&self.config.k_values, e.to_string())
                    }
                };
                (name.to_string(), result)
            })
            .collect()
    }

    /// Measures the cold-start path: each trial probes an unseen user id
    /// and scores the output against a sampled test user's held-out
    /// items, with the most popular items excluded so a pure popularity
    /// ranker cannot score for free.
    pub fn evaluate_cold_start(
        &self,
        model: &FecfModel,
        matrix: &UserItemMatrix,
        split: &TestSplit,
    ) -> Result<ColdStartMetrics> {
        if split.test.is_empty() {
            return Err(EngineError::Data(
                "evaluation split has no test users".to_string(),
            ));
        }
        let k = self.config.k_values.iter().copied().max().unwrap_or(10);

        // Items in the top exclude percentile by interaction count.
        let counts = matrix.item_interaction_counts();
        let count_values: Vec<f32> = counts.iter().map(|&c| c as f32).collect();
        let cutoff = percentile(
            &count_values,
            1.0 - self.config.cold_start_exclude_percentile,
        );
        let excluded: HashSet<&str> = matrix
            .items
            .iter()
            .zip(counts.iter())
            .filter(|(_, &c)| c as f32 > cutoff)
            .map(|(id, _)| id.as_str())
            .collect();

        let mut candidates: Vec<(&String, HashSet<String>)> = split
            .test
            .iter()
            .map(|(user, relevant)| {
                let filtered: HashSet<String> = relevant
                    .iter()
                    .filter(|id| !excluded.contains(id.as_str()))
                    .cloned()
                    .collect();
                (user, filtered)
            })
            .filter(|(_, relevant)| !relevant.is_empty())
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(b.0));
        if candidates.is_empty() {
            return Err(EngineError::Data(
                "no test users remain after popularity exclusion".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.config.random_seed);
        // One sample series per metric: precision, recall, NDCG, MAP,
        // MRR, hit ratio.
        let mut samples: [Vec<f32>; 6] = Default::default();
        for trial in 0..self.config.cold_start_trials {
            let (_, relevant) = &candidates[rng.gen_range(0..candidates.len())];
            // A probe id no log has seen forces the cold-start path.
            let probe = format!("__cold_probe_{trial}");
            let recommended: Vec<String> = model
                .recommend_for_user(&probe, k, true)
                .into_iter()
                .map(|item| item.project_id)
                .collect();
            samples[0].push(metrics::precision_at_k(&recommended, relevant, k));
            samples[1].push(metrics::recall_at_k(&recommended, relevant, k));
            samples[2].push(metrics::ndcg_at_k(&recommended, relevant, k));
            samples[3].push(metrics::map_at_k(&recommended, relevant, k));
            samples[4].push(metrics::mrr(&recommended, relevant));
            samples[5].push(metrics::hit_ratio_at_k(&recommended, relevant, k));
        }

        Ok(ColdStartMetrics {
            trials: samples[0].len(),
            mean_precision: mean(&samples[0]),
            std_precision: std_dev(&samples[0]),
            mean_recall: mean(&samples[1]),
            std_recall: std_dev(&samples[1]),
            mean_ndcg: mean(&samples[2]),
            std_ndcg: std_dev(&samples[2]),
            mean_map: mean(&samples[3]),
            std_map: std_dev(&samples[3]),
            mean_mrr: mean(&samples[4]),
            std_mrr: std_dev(&samples[4]),
            mean_hit_ratio: mean(&samples[5]),
            std_hit_ratio: std_dev(&samples[5]),
        })
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn std_dev(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / values.len() as f32).sqrt()
}
