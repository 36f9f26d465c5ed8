use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single user-item interaction event from the append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: String,
    pub project_id: String,
    pub kind: InteractionKind,
    /// Explicit interaction weight in 1..=10.
    pub weight: u8,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    View,
    Favorite,
    PortfolioAdd,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::View => "view",
            InteractionKind::Favorite => "favorite",
            InteractionKind::PortfolioAdd => "portfolio_add",
        }
    }
}

/// Catalog entry owned by the data-collection pipeline; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub chain: String,
    pub primary_category: String,
    /// Parsed from either a JSON-array string or a plain value.
    pub categories: Vec<String>,
    pub current_price: f64,
    pub market_cap: f64,
    pub total_volume: f64,
    /// 0-100 popularity score from the collector.
    pub popularity_score: f32,
    /// 0-100 trend score from the collector.
    pub trend_score: f32,
}

impl Project {
    pub fn cap_tier(&self) -> MarketCapTier {
        if self.market_cap >= 10_000_000_000.0 {
            MarketCapTier::High
        } else if self.market_cap >= 1_000_000_000.0 {
            MarketCapTier::Mid
        } else {
            MarketCapTier::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketCapTier {
    High,
    Mid,
    Low,
}

impl MarketCapTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCapTier::High => "high",
            MarketCapTier::Mid => "mid",
            MarketCapTier::Low => "low",
        }
    }
}

/// Which path produced a recommendation. Carried through blending so that
/// fallback behavior can be audited and tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendationSource {
    Fecf,
    Ncf,
    Hybrid,
    Trending,
    Popularity,
    ColdStart,
    Exploration,
}

impl RecommendationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationSource::Fecf => "fecf",
            RecommendationSource::Ncf => "ncf",
            RecommendationSource::Hybrid => "hybrid",
            RecommendationSource::Trending => "trending",
            RecommendationSource::Popularity => "popularity",
            RecommendationSource::ColdStart => "cold_start",
            RecommendationSource::Exploration => "exploration",
        }
    }
}

/// Ordered recommendation output: model-specific score plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredItem {
    pub project_id: String,
    pub score: f32,
    pub source: RecommendationSource,
}

impl ScoredItem {
    pub fn new(project_id: impl Into<String>, score: f32, source: RecommendationSource) -> Self {
        Self {
            project_id: project_id.into(),
            score,
            source,
        }
    }
}

/// Fully hydrated recommendation for the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedProject {
    #[serde(flatten)]
    pub project: Project,
    pub recommendation_score: f32,
}

/// Fully hydrated similar-item result for the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarProject {
    #[serde(flatten)]
    pub project: Project,
    pub similarity_score: f32,
}

/// Interaction-count bucket used to pick blending weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserTier {
    Cold,
    Medium,
    Rich,
}

impl UserTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserTier::Cold => "cold",
            UserTier::Medium => "medium",
            UserTier::Rich => "rich",
        }
    }
}

/// Per-request blending statistics, mirroring the shape of recall stats.
#[derive(Debug, Clone, Default)]
pub struct BlendStats {
    pub fecf_candidates: usize,
    pub ncf_candidates: usize,
    pub exploration_slots: usize,
    pub final_count: usize,
    pub tier: Option<UserTier>,
}
