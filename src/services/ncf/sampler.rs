//! Builds the supervised pool the network trains on: observed positive
//! pairs with graded targets plus sampled negatives, shuffled and split
//! into train and validation partitions.

use crate::data::UserItemMatrix;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct Sample {
    pub user: usize,
    pub item: usize,
    pub target: f32,
}

#[derive(Debug)]
pub struct TrainingPool {
    pub train: Vec<Sample>,
    pub val: Vec<Sample>,
}

impl TrainingPool {
    /// Positives keep their interaction strength as a soft target
    /// (weight over the maximum observed weight); each positive is
    /// paired with `negative_ratio` unseen items at target zero.
    pub fn build(
        matrix: &UserItemMatrix,
        negative_ratio: usize,
        val_ratio: f32,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n_items = matrix.n_items();

        let mut max_weight = 0.0f32;
        for user in &matrix.users {
            for (_, weight) in matrix.positive_items(user) {
                if weight > max_weight {
                    max_weight = weight;
                }
            }
        }
        if max_weight <= 0.0 {
            max_weight = 1.0;
        }

        let mut samples: Vec<Sample> = Vec::new();
        for (user_idx, user) in matrix.users.iter().enumerate() {
            let positives = matrix.positive_items(user);
            if positives.is_empty() {
                continue;
            }
            let seen: HashSet<usize> = positives.iter().map(|(i, _)| *i).collect();
            // A user who touched everything leaves nothing to sample.
            let can_sample_negatives = seen.len() < n_items;

            for (item_idx, weight) in &positives {
                samples.push(Sample {
                    user: user_idx,
                    item: *item_idx,
                    target: weight / max_weight,
                });
                if !can_sample_negatives {
                    continue;
                }
                for _ in 0..negative_ratio {
                    let mut candidate = rng.gen_range(0..n_items);
                    while seen.contains(&candidate) {
                        candidate = rng.gen_range(0..n_items);
                    }
                    samples.push(Sample {
                        user: user_idx,
                        item: candidate,
                        target: 0.0,
                    });
                }
            }
        }

        samples.shuffle(&mut rng);
        let val_len = ((samples.len() as f32) * val_ratio.clamp(0.0, 0.5)) as usize;
        let split = samples.len() - val_len;
        let val = samples.split_off(split);
        Self {
            train: samples,
            val,
        }
    }
}

/// Unzips a slice of samples into the parallel arrays the network wants.
pub fn to_batch(samples: &[Sample]) -> (Vec<usize>, Vec<usize>, Array1<f32>) {
    let users: Vec<usize> = samples.iter().map(|s| s.user).collect();
    let items: Vec<usize> = samples.iter().map(|s| s.item).collect();
    let targets = Array1::from(samples.iter().map(|s| s.target).collect::<Vec<f32>>());
    (users, items, targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InteractionStore;
    use crate::models::{Interaction, InteractionKind};
    use chrono::{TimeZone, Utc};

    fn matrix() -> UserItemMatrix {
        let mk = |user: &str, item: &str, weight: u8, ts: i64| Interaction {
            user_id: user.to_string(),
            project_id: item.to_string(),
            kind: InteractionKind::View,
            weight,
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
        };
        InteractionStore::from_interactions(vec![
            mk("u1", "a", 10, 1),
            mk("u1", "b", 5, 2),
            mk("u2", "c", 2, 3),
            mk("u2", "d", 8, 4),
            mk("u3", "a", 4, 5),
        ])
        .build_matrix()
    }

    #[test]
    fn test_pool_has_expected_sample_count() {
        let pool = TrainingPool::build(&matrix(), 4, 0.0, 42);
        // 5 positives, each with 4 negatives.
        assert_eq!(pool.train.len(), 25);
        assert!(pool.val.is_empty());
    }

    #[test]
    fn test_targets_graded_and_negatives_zero() {
        let pool = TrainingPool::build(&matrix(), 2, 0.0, 42);
        let positives: Vec<&Sample> = pool.train.iter().filter(|s| s.target > 0.0).collect();
        assert_eq!(positives.len(), 5);
        // Max weight 10 normalizes the strongest positive to exactly 1.
        assert!(positives.iter().any(|s| (s.target - 1.0).abs() < 1e-6));
        assert!(positives.iter().any(|s| (s.target - 0.2).abs() < 1e-6));
        let negatives = pool.train.iter().filter(|s| s.target == 0.0).count();
        assert_eq!(negatives, 10);
    }

    #[test]
    fn test_split_ratio_and_determinism() {
        let a = TrainingPool::build(&matrix(), 4, 0.2, 7);
        let b = TrainingPool::build(&matrix(), 4, 0.2, 7);
        assert_eq!(a.val.len(), 5);
        assert_eq!(a.train.len(), 20);
        for (x, y) in a.train.iter().zip(b.train.iter()) {
            assert_eq!(x.user, y.user);
            assert_eq!(x.item, y.item);
            assert_eq!(x.target, y.target);
        }
    }

    #[test]
    fn test_negatives_never_seen_by_user() {
        let pool = TrainingPool::build(&matrix(), 4, 0.0, 42);
        let m = matrix();
        for sample in pool.train.iter().filter(|s| s.target == 0.0) {
            let user = &m.users[sample.user];
            let seen: Vec<usize> = m.positive_items(user).iter().map(|(i, _)| *i).collect();
            assert!(!seen.contains(&sample.item));
        }
    }
}
