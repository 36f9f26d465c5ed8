//! End-to-end pipeline tests over synthetic data: ingest, train both
//! models, blend, evaluate and persist.

use chrono::{TimeZone, Utc};
use recommendation_engine::config::{
    CacheConfig, EvaluationConfig, FecfConfig, HybridConfig, NcfConfig,
};
use recommendation_engine::data::{FeatureMatrix, InteractionStore, ProjectCatalog};
use recommendation_engine::persist;
use recommendation_engine::services::evaluation::Evaluator;
use recommendation_engine::{
    FecfModel, HybridRecommender, Interaction, InteractionKind, NcfModel, Project,
    RecommendationSource, Recommender,
};
use std::collections::HashSet;
use std::sync::Arc;

fn project(id: &str, category: &str, chain: &str, cap: f64, pop: f32, trend: f32) -> Project {
    Project {
        id: id.to_string(),
        name: format!("{id} protocol"),
        symbol: id.to_uppercase(),
        chain: chain.to_string(),
        primary_category: category.to_string(),
        categories: vec![category.to_string()],
        current_price: 1.0,
        market_cap: cap,
        total_volume: cap / 100.0,
        popularity_score: pop,
        trend_score: trend,
    }
}

fn catalog() -> Arc<ProjectCatalog> {
    let mut projects = Vec::new();
    let categories = ["defi", "gaming", "layer-1", "meme", "infrastructure"];
    let chains = ["ethereum", "solana", "bitcoin"];
    for i in 0..20 {
        projects.push(project(
            &format!("proj{i}"),
            categories[i % categories.len()],
            chains[i % chains.len()],
            1e8 * (i as f64 + 1.0) * 7.0,
            (i * 5 % 100) as f32,
            (i * 9 % 100) as f32,
        ));
    }
    Arc::new(ProjectCatalog::from_projects(projects))
}

fn interactions() -> InteractionStore {
    let mk = |user: &str, item: &str, kind, weight: u8, ts: i64| Interaction {
        user_id: user.to_string(),
        project_id: item.to_string(),
        kind,
        weight,
        timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
    };
    let mut events = Vec::new();
    // Users with clustered tastes: even users like even projects.
    for u in 0..8 {
        let user = format!("user{u}");
        for step in 0..12 {
            let item = format!("proj{}", (u % 2 + step * 2) % 20);
            let kind = if step % 3 == 0 {
                InteractionKind::Favorite
            } else {
                InteractionKind::View
            };
            events.push(mk(&user, &item, kind, (1 + (step % 9)) as u8, (u * 100 + step) as i64));
        }
    }
    // One nearly-cold user.
    events.push(mk("cold_user", "proj0", InteractionKind::View, 2, 5000));
    InteractionStore::from_interactions(events)
}

struct Pipeline {
    catalog: Arc<ProjectCatalog>,
    fecf: Arc<FecfModel>,
    ncf: Arc<NcfModel>,
    hybrid: HybridRecommender,
}

fn build_pipeline() -> Pipeline {
    let catalog = catalog();
    let store = interactions();
    let counts = store.user_interaction_counts();
    let matrix = store.build_matrix();
    let features = FeatureMatrix::derive_from_catalog(&catalog);

    let mut fecf = FecfModel::new(
        catalog.clone(),
        FecfConfig {
            n_components: 4,
            ..FecfConfig::default()
        },
        CacheConfig::default(),
    );
    fecf.train(&matrix, &features).expect("FECF trains");

    let mut ncf = NcfModel::new(
        catalog.clone(),
        NcfConfig {
            gmf_dim: 4,
            mlp_dim: 4,
            mlp_layers: vec![8, 4],
            dropout: 0.0,
            epochs: 3,
            batch_size: 32,
            ..NcfConfig::default()
        },
    );
    ncf.train(&matrix).expect("NCF trains");

    let fecf = Arc::new(fecf);
    let ncf = Arc::new(ncf);
    let hybrid = HybridRecommender::new(
        fecf.clone(),
        ncf.clone(),
        catalog.clone(),
        HybridConfig::default(),
        counts,
    );
    Pipeline {
        catalog,
        fecf,
        ncf,
        hybrid,
    }
}

#[test]
fn full_pipeline_serves_every_user_class() {
    let pipeline = build_pipeline();

    for user in ["user0", "user5", "cold_user", "never_seen"] {
        let recs = pipeline.hybrid.recommend_for_user(user, 5, true);
        assert_eq!(recs.len(), 5, "user {user} should get a full page");
        let ids: HashSet<&str> = recs.iter().map(|r| r.project_id.as_str()).collect();
        assert_eq!(ids.len(), 5, "no duplicates for {user}");
        assert!(recs.iter().all(|r| r.score.is_finite()));
    }
}

#[test]
fn warm_user_excludes_known_items() {
    let pipeline = build_pipeline();
    let recs = pipeline.fecf.recommend_for_user("user0", 5, true);
    let known: HashSet<String> = interactions()
        .interactions()
        .iter()
        .filter(|i| i.user_id == "user0")
        .map(|i| i.project_id.clone())
        .collect();
    assert!(recs.iter().all(|r| !known.contains(&r.project_id)));
}

#[test]
fn unknown_user_pair_predicts_zero() {
    let pipeline = build_pipeline();
    assert_eq!(pipeline.ncf.predict("ghost_user", "proj0"), 0.0);
    assert_eq!(pipeline.ncf.predict("user0", "ghost_item"), 0.0);
}

#[test]
fn cold_start_page_is_diverse_and_full() {
    let pipeline = build_pipeline();
    for n in [1, 3, 5, 10] {
        let recs = pipeline.fecf.cold_start_recommendations(n);
        assert_eq!(recs.len(), n);
        let ids: HashSet<&str> = recs.iter().map(|r| r.project_id.as_str()).collect();
        assert_eq!(ids.len(), n);
    }

    // No category may dominate a 10-item page.
    let recs = pipeline.fecf.cold_start_recommendations(10);
    for category in ["defi", "gaming", "layer-1", "meme", "infrastructure"] {
        let count = recs
            .iter()
            .filter_map(|r| pipeline.catalog.get(&r.project_id))
            .filter(|p| p.primary_category == category)
            .count();
        assert!(count <= 4, "category {category} appears {count} times");
    }
}

#[test]
fn interest_based_recommendations_respect_interests() {
    let pipeline = build_pipeline();
    let interests = vec!["defi".to_string()];
    let recs = pipeline.fecf.interest_based_recommendations(&interests, 6);
    assert_eq!(recs.len(), 6);
    let matching = recs
        .iter()
        .filter_map(|r| pipeline.catalog.get(&r.project_id))
        .filter(|p| p.categories.iter().any(|c| c == "defi"))
        .count();
    assert!(matching >= 1);
}

#[test]
fn similar_projects_exclude_target() {
    let pipeline = build_pipeline();
    let similar = pipeline.fecf.get_similar_projects("proj3", 5);
    assert_eq!(similar.len(), 5);
    assert!(similar.iter().all(|s| s.project_id != "proj3"));
}

#[test]
fn repeated_calls_are_identical() {
    let pipeline = build_pipeline();
    for user in ["user2", "never_seen"] {
        let a = pipeline.hybrid.recommend_for_user(user, 6, true);
        let b = pipeline.hybrid.recommend_for_user(user, 6, true);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.project_id, y.project_id);
        }
    }
}

#[test]
fn cold_tier_output_comes_from_fecf() {
    let pipeline = build_pipeline();
    let (recs, stats) = pipeline.hybrid.recommend_with_stats("cold_user", 8, true);
    assert!(!recs.is_empty());
    assert_eq!(stats.ncf_candidates, 0);
    let non_ncf = recs
        .iter()
        .filter(|r| r.source != RecommendationSource::Ncf)
        .count() as f32;
    assert!(non_ncf / recs.len() as f32 >= 0.95);
}

#[test]
fn evaluation_reports_all_models() {
    let pipeline = build_pipeline();
    let store = interactions();
    let evaluator = Evaluator::new(EvaluationConfig {
        k_values: vec![5, 10],
        ..EvaluationConfig::default()
    });
    let split = evaluator.build_split(&store).expect("split builds");
    assert!(!split.test.is_empty());

    let models: Vec<(&str, &dyn Recommender)> = vec![
        ("fecf", &*pipeline.fecf),
        ("ncf", &*pipeline.ncf),
        ("hybrid", &pipeline.hybrid),
    ];
    let results = evaluator.evaluate_all(&models, &split);
    assert_eq!(results.len(), 3);
    for (name, metrics) in &results {
        assert!(metrics.error.is_none(), "{name} evaluation errored");
        assert!(metrics.evaluated_users > 0);
        for k in [5usize, 10] {
            let p = metrics.precision[&k];
            assert!((0.0..=1.0).contains(&p), "{name} precision@{k}={p}");
            assert!((0.0..=1.0).contains(&metrics.ndcg[&k]));
        }
    }
}

#[test]
fn cold_start_evaluation_runs_seeded_trials() {
    let pipeline = build_pipeline();
    let store = interactions();
    let evaluator = Evaluator::new(EvaluationConfig::default());
    let split = evaluator.build_split(&store).unwrap();
    let matrix = split.train.build_matrix();

    let report = evaluator
        .evaluate_cold_start(&pipeline.fecf, &matrix, &split)
        .expect("cold-start evaluation runs");
    assert_eq!(report.trials, 5);
    for mean in [
        report.mean_precision,
        report.mean_recall,
        report.mean_ndcg,
        report.mean_map,
        report.mean_mrr,
        report.mean_hit_ratio,
    ] {
        assert!((0.0..=1.0).contains(&mean));
    }
    for std in [
        report.std_precision,
        report.std_recall,
        report.std_ndcg,
        report.std_map,
        report.std_mrr,
        report.std_hit_ratio,
    ] {
        assert!(std >= 0.0);
    }
}

#[test]
fn persisted_models_serve_identically() {
    let pipeline = build_pipeline();
    let dir = tempfile::tempdir().unwrap();

    let fecf_path = dir.path().join("fecf.json");
    persist::save_fecf(&pipeline.fecf, &fecf_path).unwrap();
    let restored = persist::load_fecf(
        &fecf_path,
        pipeline.catalog.clone(),
        pipeline.fecf.config().clone(),
        CacheConfig::default(),
    )
    .unwrap();
    let before = pipeline.fecf.recommend_for_user("user1", 5, true);
    let after = restored.recommend_for_user("user1", 5, true);
    assert_eq!(
        before.iter().map(|r| &r.project_id).collect::<Vec<_>>(),
        after.iter().map(|r| &r.project_id).collect::<Vec<_>>()
    );

    let ncf_path = dir.path().join("ncf.json");
    persist::save_ncf(&pipeline.ncf, &ncf_path).unwrap();
    let restored = persist::load_ncf(
        &ncf_path,
        pipeline.catalog.clone(),
        pipeline.ncf.config().clone(),
    )
    .unwrap();
    assert_eq!(
        pipeline.ncf.predict("user1", "proj7"),
        restored.predict("user1", "proj7")
    );
}

#[test]
fn category_and_chain_queries_filter_results() {
    let pipeline = build_pipeline();
    let by_category = pipeline
        .fecf
        .recommendations_by_category("user1", "gaming", 4, false);
    assert!(!by_category.is_empty());
    for rec in &by_category {
        let p = pipeline.catalog.get(&rec.project_id).unwrap();
        assert!(p.categories.iter().any(|c| c.contains("gaming")));
    }

    let combined =
        pipeline
            .fecf
            .recommendations_by_category_and_chain("user1", "defi", "ethereum", 4, false);
    for rec in &combined {
        let p = pipeline.catalog.get(&rec.project_id).unwrap();
        assert_eq!(p.chain, "ethereum");
        assert!(p.categories.iter().any(|c| c.contains("defi")));
    }
}
