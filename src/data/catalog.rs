use crate::error::Result;
use crate::models::{Project, RecommendedProject, ScoredItem, SimilarProject};
use crate::utils::sort_by_score_desc;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Raw CSV row shape for `projects.csv`.
#[derive(Debug, Deserialize)]
struct ProjectRecord {
    id: String,
    name: String,
    symbol: String,
    chain: String,
    primary_category: String,
    #[serde(default)]
    categories_list: String,
    #[serde(default)]
    current_price: f64,
    #[serde(default)]
    market_cap: f64,
    #[serde(default)]
    total_volume: f64,
    #[serde(default)]
    popularity_score: f32,
    #[serde(default)]
    trend_score: f32,
}

/// Parse a category field that is either a JSON array string or a plain
/// value. Anything unparseable fails closed to a single-element list.
pub fn parse_categories(raw: &str, fallback: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        if fallback.is_empty() {
            return Vec::new();
        }
        return vec![fallback.to_string()];
    }

    if trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Vec<String>>(trimmed) {
            let cleaned: Vec<String> = parsed
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if !cleaned.is_empty() {
                return cleaned;
            }
        }
        warn!("Unparseable categories field, treating as single value");
    }

    vec![trimmed.to_string()]
}

/// Read-only project catalog owned by the data-collection subsystem.
pub struct ProjectCatalog {
    projects: Vec<Project>,
    by_id: HashMap<String, usize>,
}

impl ProjectCatalog {
    pub fn from_projects(projects: Vec<Project>) -> Self {
        let by_id = projects
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        Self { projects, by_id }
    }

    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let mut projects = Vec::new();
        let mut skipped = 0usize;

        for row in reader.deserialize::<ProjectRecord>() {
            let record = match row {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping malformed project row: {}", e);
                    skipped += 1;
                    continue;
                }
            };
            if record.id.is_empty() {
                skipped += 1;
                continue;
            }

            let categories = parse_categories(&record.categories_list, &record.primary_category);
            projects.push(Project {
                id: record.id,
                name: record.name,
                symbol: record.symbol,
                chain: record.chain,
                primary_category: record.primary_category,
                categories,
                current_price: record.current_price,
                market_cap: record.market_cap,
                total_volume: record.total_volume,
                // Collector scores occasionally exceed the 0-100 contract.
                popularity_score: record.popularity_score.clamp(0.0, 100.0),
                trend_score: record.trend_score.clamp(0.0, 100.0),
            });
        }

        info!(
            loaded = projects.len(),
            skipped = skipped,
            "Project catalog loaded"
        );
        Ok(Self::from_projects(projects))
    }

    pub fn get(&self, project_id: &str) -> Option<&Project> {
        self.by_id.get(project_id).map(|&i| &self.projects[i])
    }

    pub fn contains(&self, project_id: &str) -> bool {
        self.by_id.contains_key(project_id)
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn top_by_market_cap(&self, n: usize) -> Vec<&Project> {
        let mut ranked: Vec<(&Project, f32)> = self
            .projects
            .iter()
            .map(|p| (p, p.market_cap as f32))
            .collect();
        sort_by_score_desc(&mut ranked);
        ranked.into_iter().take(n).map(|(p, _)| p).collect()
    }

    pub fn top_by_popularity(&self, n: usize) -> Vec<&Project> {
        let mut ranked: Vec<(&Project, f32)> = self
            .projects
            .iter()
            .map(|p| (p, p.popularity_score))
            .collect();
        sort_by_score_desc(&mut ranked);
        ranked.into_iter().take(n).map(|(p, _)| p).collect()
    }

    pub fn top_by_trend(&self, n: usize) -> Vec<&Project> {
        let mut ranked: Vec<(&Project, f32)> =
            self.projects.iter().map(|p| (p, p.trend_score)).collect();
        sort_by_score_desc(&mut ranked);
        ranked.into_iter().take(n).map(|(p, _)| p).collect()
    }

    /// Attach full project metadata to scored results, silently dropping
    /// ids the catalog no longer knows.
    pub fn hydrate_recommendations(&self, items: &[ScoredItem]) -> Vec<RecommendedProject> {
        items
            .iter()
            .filter_map(|item| {
                self.get(&item.project_id).map(|project| RecommendedProject {
                    project: project.clone(),
                    recommendation_score: item.score,
                })
            })
            .collect()
    }

    pub fn hydrate_similar(&self, items: &[ScoredItem]) -> Vec<SimilarProject> {
        items
            .iter()
            .filter_map(|item| {
                self.get(&item.project_id).map(|project| SimilarProject {
                    project: project.clone(),
                    similarity_score: item.score,
                })
            })
            .collect()
    }

    /// All distinct category names across the catalog.
    pub fn categories(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for project in &self.projects {
            for category in &project.categories {
                if !seen.contains(category) {
                    seen.push(category.clone());
                }
            }
        }
        seen
    }
}
