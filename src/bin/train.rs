//! Offline training pipeline: load the CSV exports, train both models,
//! run the evaluation harness and persist the snapshots.

use anyhow::Context;
use recommendation_engine::data::{FeatureMatrix, InteractionStore, ProjectCatalog};
use recommendation_engine::services::evaluation::Evaluator;
use recommendation_engine::services::hybrid::HybridRecommender;
use recommendation_engine::{persist, Config, FecfModel, NcfModel, Recommender};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();

    let catalog = Arc::new(
        ProjectCatalog::from_csv(&config.data.projects_path)
            .with_context(|| format!("loading projects from {}", config.data.projects_path))?,
    );
    let store = InteractionStore::from_csv(&config.data.interactions_path)
        .with_context(|| format!("loading interactions from {}", config.data.interactions_path))?;
    let features = match FeatureMatrix::from_csv(&config.data.features_path) {
        Ok(features) => features,
        Err(e) => {
            info!(error = %e, "No feature export available, deriving features from the catalog");
            FeatureMatrix::derive_from_catalog(&catalog)
        }
    };
    info!(
        projects = catalog.len(),
        interactions = store.len(),
        "Data loaded"
    );

    // Models train on the split's train side so the evaluation below is
    // honest; retrain on the full log before shipping if needed.
    let evaluator = Evaluator::new(config.evaluation.clone());
    let split = evaluator.build_split(&store)?;
    let matrix = split.train.build_matrix();

    let mut fecf = FecfModel::new(catalog.clone(), config.fecf.clone(), config.cache.clone());
    let fecf_report = fecf.train(&matrix, &features)?;
    info!(
        n_components = fecf_report.n_components,
        explained_variance = fecf_report.explained_variance,
        "FECF trained"
    );

    let mut ncf = NcfModel::new(catalog.clone(), config.ncf.clone());
    let ncf_report = ncf.train(&matrix)?;
    info!(
        epochs_run = ncf_report.epochs_run,
        val_loss = ncf_report.val_loss,
        "NCF trained"
    );

    std::fs::create_dir_all("models").context("creating models directory")?;
    persist::save_fecf(&fecf, "models/fecf.json").context("saving FECF snapshot")?;
    persist::save_ncf(&ncf, "models/ncf.json").context("saving NCF snapshot")?;

    let fecf = Arc::new(fecf);
    let ncf = Arc::new(ncf);
    let hybrid = HybridRecommender::new(
        fecf.clone(),
        ncf.clone(),
        catalog,
        config.hybrid.clone(),
        split.train.user_interaction_counts(),
    );

    let models: Vec<(&str, &dyn Recommender)> =
        vec![("fecf", &*fecf), ("ncf", &*ncf), ("hybrid", &hybrid)];
    let results = evaluator.evaluate_all(&models, &split);
    for (name, metrics) in &results {
        match &metrics.error {
            Some(error) => info!(model = %name, error = %error, "Evaluation failed"),
            None => info!(
                model = %name,
                evaluated_users = metrics.evaluated_users,
                mrr = metrics.mrr,
                metrics = %serde_json::to_string(metrics)?,
                "Evaluation complete"
            ),
        }
    }

    let cold = evaluator.evaluate_cold_start(&fecf, &matrix, &split)?;
    info!(
        trials = cold.trials,
        mean_precision = cold.mean_precision,
        std_precision = cold.std_precision,
        mean_ndcg = cold.mean_ndcg,
        mean_mrr = cold.mean_mrr,
        mean_hit_ratio = cold.mean_hit_ratio,
        metrics = %serde_json::to_string(&cold)?,
        "Cold-start evaluation complete"
    );

    Ok(())
}
