use crate::data::catalog::ProjectCatalog;
use crate::error::{EngineError, Result};
use crate::models::MarketCapTier;
use ndarray::Array2;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Columns never used as content features: identifiers plus raw market
/// metrics that are already represented through dedicated bucket features.
/// Including the raw values would double-count and dominate cosine
/// similarity.
const EXCLUDED_COLUMNS: &[&str] = &[
    "id",
    "project_id",
    "name",
    "symbol",
    "market_cap",
    "total_volume",
    "current_price",
    "popularity_score",
    "trend_score",
    "activity_score",
];

/// Per-project content feature vectors, L2-normalized per row.
pub struct FeatureMatrix {
    vectors: HashMap<String, Vec<f32>>,
    dim: usize,
}

impl FeatureMatrix {
    /// Load `features.csv`. The first column is the project id; every
    /// non-excluded remaining column is parsed as a numeric feature
    /// (unparseable cells become 0.0 rather than an error).
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Err(EngineError::Data("features file has no header".to_string()));
        }

        let keep: Vec<usize> = headers
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, name)| !EXCLUDED_COLUMNS.contains(&name.to_lowercase().as_str()))
            .map(|(i, _)| i)
            .collect();

        let mut vectors: HashMap<String, Vec<f32>> = HashMap::new();
        for row in reader.records() {
            let record = match row {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping malformed feature row: {}", e);
                    continue;
                }
            };
            let Some(id) = record.get(0) else { continue };
            let vector: Vec<f32> = keep
                .iter()
                .map(|&i| {
                    record
                        .get(i)
                        .and_then(|v| v.trim().parse::<f32>().ok())
                        .unwrap_or(0.0)
                })
                .collect();
            vectors.insert(id.to_string(), l2_normalize(vector));
        }

        info!(
            projects = vectors.len(),
            dim = keep.len(),
            "Content features loaded"
        );
        Ok(Self {
            vectors,
            dim: keep.len(),
        })
    }

    /// Build content features directly from catalog metadata when no
    /// features file is available: category one-hots, chain one-hots, a
    /// log-price bucket, a market-cap tier one-hot and a trend bucket.
    pub fn derive_from_catalog(catalog: &ProjectCatalog) -> Self {
        let categories = catalog.categories();
        let mut chains: Vec<String> = Vec::new();
        for project in catalog.projects() {
            if !chains.contains(&project.chain) {
                chains.push(project.chain.clone());
            }
        }

        // categories + chains + 4 price buckets + 3 cap tiers + 3 trend buckets
        let dim = categories.len() + chains.len() + 10;
        let mut vectors = HashMap::new();

        for project in catalog.projects() {
            let mut vector = vec![0.0f32; dim];
            for category in &project.categories {
                if let Some(pos) = categories.iter().position(|c| c == category) {
                    vector[pos] = 1.0;
                }
            }
            if let Some(pos) = chains.iter().position(|c| *c == project.chain) {
                vector[categories.len() + pos] = 1.0;
            }

            let offset = categories.len() + chains.len();
            vector[offset + price_bucket(project.current_price)] = 1.0;

            let tier_slot = match project.cap_tier() {
                MarketCapTier::High => 0,
                MarketCapTier::Mid => 1,
                MarketCapTier::Low => 2,
            };
            vector[offset + 4 + tier_slot] = 1.0;

            let trend_slot = if project.trend_score >= 66.0 {
                0
            } else if project.trend_score >= 33.0 {
                1
            } else {
                2
            };
            vector[offset + 7 + trend_slot] = 1.0;

            vectors.insert(project.id.clone(), l2_normalize(vector));
        }

        Self { vectors, dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn get(&self, project_id: &str) -> Option<&[f32]> {
        self.vectors.get(project_id).map(|v| v.as_slice())
    }

    /// Dense matrix with one row per requested item, in order. Items
    /// without features get a zero row rather than an error.
    pub fn aligned(&self, items: &[String]) -> Array2<f32> {
        let mut matrix = Array2::<f32>::zeros((items.len(), self.dim.max(1)));
        for (row, item) in items.iter().enumerate() {
            if let Some(vector) = self.vectors.get(item) {
                for (col, &value) in vector.iter().enumerate() {
                    matrix[[row, col]] = value;
                }
            }
        }
        matrix
    }
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

fn price_bucket(price: f64) -> usize {
    if price >= 1000.0 {
        0
    } else if price >= 10.0 {
        1
    } else if price >= 0.1 {
        2
    } else {
        3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Project;

    fn project(id: &str, category: &str, chain: &str, price: f64, cap: f64, trend: f32) -> Project {
        Project {
            id: id.to_string(),
            name: id.to_string(),
            symbol: id.to_uppercase(),
            chain: chain.to_string(),
            primary_category: category.to_string(),
            categories: vec![category.to_string()],
            current_price: price,
            market_cap: cap,
            total_volume: 0.0,
            popularity_score: 50.0,
            trend_score: trend,
        }
    }

    #[test]
    fn test_derived_features_are_unit_norm() {
        let catalog = ProjectCatalog::from_projects(vec![
            project("btc", "layer-1", "bitcoin", 50_000.0, 1e12, 70.0),
            project("uni", "defi", "ethereum", 8.0, 5e9, 40.0),
        ]);
        let features = FeatureMatrix::derive_from_catalog(&catalog);

        for id in ["btc", "uni"] {
            let vector = features.get(id).expect("vector exists");
            let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5, "{} norm = {}", id, norm);
        }
    }

    #[test]
    fn test_aligned_zero_fills_missing_items() {
        let catalog =
            ProjectCatalog::from_projects(vec![project("btc", "layer-1", "bitcoin", 1.0, 1e12, 70.0)]);
        let features = FeatureMatrix::derive_from_catalog(&catalog);

        let matrix = features.aligned(&["btc".to_string(), "ghost".to_string()]);
        assert_eq!(matrix.nrows(), 2);
        assert!(matrix.row(0).iter().any(|&v| v > 0.0));
        assert!(matrix.row(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_price_bucket_edges() {
        assert_eq!(price_bucket(2_000.0), 0);
        assert_eq!(price_bucket(50.0), 1);
        assert_eq!(price_bucket(0.5), 2);
        assert_eq!(price_bucket(0.0001), 3);
    }
}
