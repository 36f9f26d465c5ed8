//! Model persistence as versioned JSON envelopes. A snapshot records
//! the format version and save time alongside the model state, so a
//! loader can reject files written by an incompatible build instead of
//! deserializing garbage.

use crate::config::{CacheConfig, FecfConfig, NcfConfig};
use crate::data::ProjectCatalog;
use crate::error::{EngineError, Result};
use crate::services::fecf::{ColdStartIndex, FecfModel};
use crate::services::ncf::NcfModel;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    format_version: u32,
    saved_at: DateTime<Utc>,
    state: T,
}

fn write_envelope<T: Serialize, P: AsRef<Path>>(path: P, state: T) -> Result<()> {
    let envelope = Envelope {
        format_version: FORMAT_VERSION,
        saved_at: Utc::now(),
        state,
    };
    let file = File::create(path.as_ref())?;
    serde_json::to_writer(BufWriter::new(file), &envelope)?;
    Ok(())
}

fn read_envelope<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let file = File::open(path.as_ref())?;
    let envelope: Envelope<T> = serde_json::from_reader(BufReader::new(file))?;
    if envelope.format_version != FORMAT_VERSION {
        return Err(EngineError::Persistence(format!(
            "unsupported snapshot format {} (expected {})",
            envelope.format_version, FORMAT_VERSION
        )));
    }
    Ok(envelope.state)
}

#[derive(Serialize, Deserialize)]
struct FecfSnapshot {
    state: crate::services::fecf::TrainedState,
    cold_index: ColdStartIndex,
}

pub fn save_fecf<P: AsRef<Path>>(model: &FecfModel, path: P) -> Result<()> {
    let state = model.state().cloned().ok_or_else(|| {
        EngineError::InvalidInput("cannot save an untrained FECF model".to_string())
    })?;
    write_envelope(
        &path,
        FecfSnapshot {
            state,
            cold_index: model.cold_index().clone(),
        },
    )?;
    info!(path = %path.as_ref().display(), "FECF model saved");
    Ok(())
}

pub fn load_fecf<P: AsRef<Path>>(
    path: P,
    catalog: Arc<ProjectCatalog>,
    config: FecfConfig,
    cache_config: CacheConfig,
) -> Result<FecfModel> {
    let snapshot: FecfSnapshot = read_envelope(&path)?;
    info!(path = %path.as_ref().display(), "FECF model loaded");
    Ok(FecfModel::from_parts(
        catalog,
        config,
        cache_config,
        snapshot.state,
        Some(snapshot.cold_index),
    ))
}

pub fn save_ncf<P: AsRef<Path>>(model: &NcfModel, path: P) -> Result<()> {
    let state = model.state().cloned().ok_or_else(|| {
        EngineError::InvalidInput("cannot save an untrained NCF model".to_string())
    })?;
    write_envelope(&path, state)?;
    info!(path = %path.as_ref().display(), "NCF model saved");
    Ok(())
}

pub fn load_ncf<P: AsRef<Path>>(
    path: P,
    catalog: Arc<ProjectCatalog>,
    config: NcfConfig,
) -> Result<NcfModel> {
    let state = read_envelope(&path)?;
    info!(path = %path.as_ref().display(), "NCF model loaded");
    Ok(NcfModel::from_parts(catalog, config, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FeatureMatrix, InteractionStore};
    use crate::models::{Interaction, InteractionKind, Project};
    use crate::services::Recommender;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::tempdir;

    fn project(id: &str) -> Project {
        Project {
            id: id.to_string(),
            name: id.to_string(),
            symbol: id.to_uppercase(),
            chain: "ethereum".to_string(),
            primary_category: "defi".to_string(),
            categories: vec!["defi".to_string()],
            current_price: 1.0,
            market_cap: 1e9,
            total_volume: 0.0,
            popularity_score: 50.0,
            trend_score: 50.0,
        }
    }

    fn interaction(user: &str, item: &str, weight: u8, ts: i64) -> Interaction {
        Interaction {
            user_id: user.to_string(),
            project_id: item.to_string(),
            kind: InteractionKind::View,
            weight,
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    fn fixture() -> (Arc<ProjectCatalog>, crate::data::UserItemMatrix) {
        let catalog = Arc::new(ProjectCatalog::from_projects(vec![
            project("a"),
            project("b"),
            project("c"),
            project("d"),
        ]));
        let matrix = InteractionStore::from_interactions(vec![
            interaction("u1", "a", 5, 1),
            interaction("u1", "b", 3, 2),
            interaction("u2", "c", 4, 3),
            interaction("u2", "d", 2, 4),
            interaction("u3", "a", 1, 5),
            interaction("u3", "c", 5, 6),
        ])
        .build_matrix();
        (catalog, matrix)
    }

    #[test]
    fn test_fecf_round_trip_preserves_recommendations() {
        let (catalog, matrix) = fixture();
        let features = FeatureMatrix::derive_from_catalog(&catalog);
        let config = FecfConfig {
            n_components: 2,
            ..FecfConfig::default()
        };
        let mut model = FecfModel::new(catalog.clone(), config.clone(), CacheConfig::default());
        model.train(&matrix, &features).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("fecf.json");
        save_fecf(&model, &path).unwrap();

        let loaded = load_fecf(&path, catalog, config, CacheConfig::default()).unwrap();
        assert!(loaded.is_trained());

        let before = model.recommend_for_user("u1", 2, true);
        let after = loaded.recommend_for_user("u1", 2, true);
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.project_id, b.project_id);
            assert_eq!(a.score, b.score);
        }
    }

    #[test]
    fn test_ncf_round_trip_preserves_predictions() {
        let (catalog, matrix) = fixture();
        let config = NcfConfig {
            gmf_dim: 4,
            mlp_dim: 4,
            mlp_layers: vec![8],
            dropout: 0.0,
            epochs: 2,
            batch_size: 8,
            ..NcfConfig::default()
        };
        let mut model = NcfModel::new(catalog.clone(), config.clone());
        model.train(&matrix).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("ncf.json");
        save_ncf(&model, &path).unwrap();

        let loaded = load_ncf(&path, catalog, config).unwrap();
        assert!(loaded.is_trained());
        assert_eq!(model.predict("u1", "c"), loaded.predict("u1", "c"));
    }

    #[test]
    fn test_untrained_save_rejected() {
        let (catalog, _) = fixture();
        let model = FecfModel::new(catalog, FecfConfig::default(), CacheConfig::default());
        let dir = tempdir().unwrap();
        let err = save_fecf(&model, dir.path().join("nope.json")).err().unwrap();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_corrupt_file_is_persistence_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"{ not valid json").unwrap();

        let (catalog, _) = fixture();
        let err = load_fecf(&path, catalog, FecfConfig::default(), CacheConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Persistence(_)));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let (catalog, matrix) = fixture();
        let features = FeatureMatrix::derive_from_catalog(&catalog);
        let mut model = FecfModel::new(
            catalog.clone(),
            FecfConfig {
                n_components: 2,
                ..FecfConfig::default()
            },
            CacheConfig::default(),
        );
        model.train(&matrix, &features).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("fecf.json");
        save_fecf(&model, &path).unwrap();

        // Rewrite the envelope with a bumped version.
        let raw = std::fs::read_to_string(&path).unwrap();
        let bumped = raw.replacen("\"format_version\":1", "\"format_version\":99", 1);
        std::fs::write(&path, bumped).unwrap();

        let err = load_fecf(&path, catalog, FecfConfig::default(), CacheConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Persistence(_)));
    }
}
