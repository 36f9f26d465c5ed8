use crate::error::Result;
use crate::models::{Interaction, InteractionKind};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Raw CSV row shape for `interactions.csv`.
#[derive(Debug, Deserialize)]
struct InteractionRecord {
    user_id: String,
    project_id: String,
    interaction_type: String,
    weight: u8,
    timestamp: DateTime<Utc>,
}

/// Append-only log of user-item interactions.
#[derive(Debug)]
pub struct InteractionStore {
    interactions: Vec<Interaction>,
}

impl InteractionStore {
    pub fn new() -> Self {
        Self {
            interactions: Vec::new(),
        }
    }

    pub fn from_interactions(interactions: Vec<Interaction>) -> Self {
        Self { interactions }
    }

    /// Load the interaction log, skipping malformed rows.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let mut interactions = Vec::new();
        let mut skipped = 0usize;

        for row in reader.deserialize::<InteractionRecord>() {
            let record = match row {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping malformed interaction row: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            let kind = match record.interaction_type.as_str() {
                "view" => InteractionKind::View,
                "favorite" => InteractionKind::Favorite,
                "portfolio_add" => InteractionKind::PortfolioAdd,
                other => {
                    warn!("Skipping interaction with unknown type: {}", other);
                    skipped += 1;
                    continue;
                }
            };

            interactions.push(Interaction {
                user_id: record.user_id,
                project_id: record.project_id,
                kind,
                weight: record.weight.clamp(1, 10),
                timestamp: record.timestamp,
            });
        }

        info!(
            loaded = interactions.len(),
            skipped = skipped,
            "Interaction log loaded"
        );
        Ok(Self { interactions })
    }

    pub fn push(&mut self, interaction: Interaction) {
        self.interactions.push(interaction);
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Positive-interaction event count per user, used for hybrid tiering.
    pub fn user_interaction_counts(&self) -> HashMap<String, usize> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for interaction in &self.interactions {
            if interaction.weight > 0 {
                *counts.entry(interaction.user_id.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Materialize the dense user-item matrix.
    ///
    /// Repeated (user, project) pairs resolve last-write-wins by timestamp;
    /// equal timestamps resolve to the later row in the log, so a replayed
    /// file always pivots to the same matrix.
    pub fn build_matrix(&self) -> UserItemMatrix {
        let mut user_index: HashMap<String, usize> = HashMap::new();
        let mut item_index: HashMap<String, usize> = HashMap::new();
        let mut users: Vec<String> = Vec::new();
        let mut items: Vec<String> = Vec::new();
        let mut cells: HashMap<(usize, usize), (f32, DateTime<Utc>)> = HashMap::new();

        for interaction in &self.interactions {
            let u = *user_index
                .entry(interaction.user_id.clone())
                .or_insert_with(|| {
                    users.push(interaction.user_id.clone());
                    users.len() - 1
                });
            let i = *item_index
                .entry(interaction.project_id.clone())
                .or_insert_with(|| {
                    items.push(interaction.project_id.clone());
                    items.len() - 1
                });

            let value = (interaction.weight as f32, interaction.timestamp);
            cells
                .entry((u, i))
                .and_modify(|existing| {
                    if interaction.timestamp >= existing.1 {
                        *existing = value;
                    }
                })
                .or_insert(value);
        }

        let mut matrix = Array2::<f32>::zeros((users.len(), items.len()));
        for (&(u, i), &(weight, _)) in &cells {
            matrix[[u, i]] = weight;
        }

        UserItemMatrix {
            matrix,
            users,
            items,
            user_index,
            item_index,
        }
    }
}

impl Default for InteractionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Dense user x item weight matrix with stable id <-> index maps.
#[derive(Debug, Clone)]
pub struct UserItemMatrix {
    pub matrix: Array2<f32>,
    pub users: Vec<String>,
    pub items: Vec<String>,
    pub user_index: HashMap<String, usize>,
    pub item_index: HashMap<String, usize>,
}

impl UserItemMatrix {
    pub fn n_users(&self) -> usize {
        self.users.len()
    }

    pub fn n_items(&self) -> usize {
        self.items.len()
    }

    /// (item index, weight) pairs with positive weight for a known user.
    pub fn positive_items(&self, user_id: &str) -> Vec<(usize, f32)> {
        let Some(&u) = self.user_index.get(user_id) else {
            return Vec::new();
        };
        self.matrix
            .row(u)
            .iter()
            .enumerate()
            .filter(|(_, &w)| w > 0.0)
            .map(|(i, &w)| (i, w))
            .collect()
    }

    /// Number of items a known user has positively interacted with.
    pub fn positive_count(&self, user_id: &str) -> usize {
        self.positive_items(user_id).len()
    }

    /// Per-item count of users with a positive cell.
    pub fn item_interaction_counts(&self) -> Vec<usize> {
        (0..self.n_items())
            .map(|i| self.matrix.column(i).iter().filter(|&&w| w > 0.0).count())
            .collect()
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.user_index.contains_key(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn interaction(user: &str, item: &str, weight: u8, ts_secs: i64) -> Interaction {
        Interaction {
            user_id: user.to_string(),
            project_id: item.to_string(),
            kind: InteractionKind::View,
            weight,
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_build_matrix_shape_and_order() {
        let store = InteractionStore::from_interactions(vec![
            interaction("u1", "btc", 5, 100),
            interaction("u2", "eth", 3, 101),
            interaction("u1", "eth", 2, 102),
        ]);

        let matrix = store.build_matrix();
        assert_eq!(matrix.n_users(), 2);
        assert_eq!(matrix.n_items(), 2);
        // First-appearance ordering is stable.
        assert_eq!(matrix.users, vec!["u1", "u2"]);
        assert_eq!(matrix.items, vec!["btc", "eth"]);
        assert_eq!(matrix.matrix[[0, 0]], 5.0);
        assert_eq!(matrix.matrix[[0, 1]], 2.0);
        assert_eq!(matrix.matrix[[1, 0]], 0.0);
    }

    #[test]
    fn test_aggregation_is_last_write_wins() {
        let store = InteractionStore::from_interactions(vec![
            interaction("u1", "btc", 9, 200),
            interaction("u1", "btc", 3, 100), // older event must not win
            interaction("u1", "btc", 7, 200), // tie resolves to later row
        ]);

        let matrix = store.build_matrix();
        assert_eq!(matrix.matrix[[0, 0]], 7.0);
    }

    #[test]
    fn test_positive_items_unknown_user() {
        let store = InteractionStore::from_interactions(vec![interaction("u1", "btc", 5, 1)]);
        let matrix = store.build_matrix();
        assert!(matrix.positive_items("ghost").is_empty());
        assert_eq!(matrix.positive_count("ghost"), 0);
    }

    #[test]
    fn test_user_interaction_counts() {
        let store = InteractionStore::from_interactions(vec![
            interaction("u1", "btc", 5, 1),
            interaction("u1", "eth", 4, 2),
            interaction("u2", "btc", 1, 3),
        ]);
        let counts = store.user_interaction_counts();
        assert_eq!(counts["u1"], 2);
        assert_eq!(counts["u2"], 1);
    }
}
