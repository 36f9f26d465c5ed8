//! Hybrid recommendation engine for crypto projects.
//!
//! The pipeline pairs a feature-enhanced collaborative filter (truncated
//! SVD over the interaction matrix, blended with content similarity)
//! with a neural collaborative filter, and blends both behind a single
//! [`services::Recommender`] interface. An offline evaluator scores any
//! recommender against held-out interactions, and trained models can be
//! persisted as versioned JSON snapshots.

pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod persist;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, Result};
pub use models::{
    Interaction, InteractionKind, Project, RecommendationSource, RecommendedProject, ScoredItem,
    SimilarProject, UserTier,
};
pub use services::{Evaluator, FecfModel, HybridRecommender, NcfModel, Recommender};
