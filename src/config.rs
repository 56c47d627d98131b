//! TOML configuration.
//!
//! Every section and field is optional; a missing config file yields
//! [`Config::minimal`]. CLI flags override the values loaded here.
//!
//! ```toml
//! [db]
//! path = "./data/cae.sqlite"
//!
//! [github]
//! token_env = "GITHUB_TOKEN"
//! min_sleep_ms = 1500
//!
//! [harvest]
//! steps = 100
//! per_page = 50
//! pages_per_query = 2
//! sort = "updated"
//!
//! [harvest.filters]
//! min_stars = 1
//!
//! [[harvest.shapes]]
//! categories = ["domain", "method", "intent"]
//! weight = 0.45
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use cae_harvester_core::compose::{default_shapes, ComposerConfig, RecipeShape};
use cae_harvester_core::extract::ExtractConfig;
use cae_harvester_core::query::RepoFilters;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
    #[serde(default)]
    pub extract: ExtractSettings,
    #[serde(default)]
    pub promote: PromoteConfig,
}

impl Config {
    /// Built-in defaults with the database under `./data/`.
    pub fn minimal() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/cae.sqlite")
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Name of the environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Minimum pause between consecutive requests.
    #[serde(default = "default_min_sleep_ms")]
    pub min_sleep_ms: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_env: default_token_env(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            min_sleep_ms: default_min_sleep_ms(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_user_agent() -> String {
    format!("cae-harvester/{}", env!("CARGO_PKG_VERSION"))
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_backoff_secs() -> u64 {
    120
}
fn default_min_sleep_ms() -> u64 {
    1_500
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_pages_per_query")]
    pub pages_per_query: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_sort")]
    pub sort: String,
    #[serde(default = "default_order")]
    pub order: String,
    #[serde(default = "default_max_terms")]
    pub max_terms: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_filters")]
    pub filters: RepoFilters,
    #[serde(default = "default_shapes")]
    pub shapes: Vec<RecipeShape>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            per_page: default_per_page(),
            pages_per_query: default_pages_per_query(),
            seed: default_seed(),
            workers: default_workers(),
            sort: default_sort(),
            order: default_order(),
            max_terms: default_max_terms(),
            max_attempts: default_max_attempts(),
            filters: default_filters(),
            shapes: default_shapes(),
        }
    }
}

impl HarvestConfig {
    /// Composer settings; fails if the qualifier bounds are invalid.
    pub fn composer(&self) -> Result<ComposerConfig> {
        Ok(ComposerConfig {
            shapes: self.shapes.clone(),
            max_terms: self.max_terms,
            max_attempts: self.max_attempts,
            qualifiers: self.filters.qualifiers()?,
        })
    }
}

fn default_steps() -> usize {
    100
}
fn default_per_page() -> u32 {
    50
}
fn default_pages_per_query() -> u32 {
    2
}
fn default_seed() -> u64 {
    42
}
fn default_workers() -> usize {
    1
}
fn default_sort() -> String {
    "updated".to_string()
}
fn default_order() -> String {
    "desc".to_string()
}
fn default_max_terms() -> usize {
    5
}
fn default_max_attempts() -> usize {
    50
}
fn default_filters() -> RepoFilters {
    RepoFilters {
        min_stars: Some(1),
        min_forks: Some(1),
        min_topics: Some(1),
        ..Default::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichConfig {
    #[serde(default = "default_enrich_limit")]
    pub limit: usize,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            limit: default_enrich_limit(),
        }
    }
}

fn default_enrich_limit() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractSettings {
    #[serde(default = "default_limit_repos")]
    pub limit_repos: usize,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_topic_weight")]
    pub topic_weight: f64,
    #[serde(default = "default_description_weight")]
    pub description_weight: f64,
    #[serde(default = "default_true")]
    pub skip_related_terms: bool,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            limit_repos: default_limit_repos(),
            top_n: default_top_n(),
            topic_weight: default_topic_weight(),
            description_weight: default_description_weight(),
            skip_related_terms: true,
        }
    }
}

impl ExtractSettings {
    pub fn scoring(&self) -> ExtractConfig {
        ExtractConfig {
            topic_weight: self.topic_weight,
            description_weight: self.description_weight,
            skip_related_terms: self.skip_related_terms,
        }
    }
}

fn default_limit_repos() -> usize {
    2_000
}
fn default_top_n() -> usize {
    500
}
fn default_topic_weight() -> f64 {
    1.0
}
fn default_description_weight() -> f64 {
    0.3
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromoteConfig {
    #[serde(default = "default_promote_weight")]
    pub weight: f64,
    #[serde(default = "default_promote_source")]
    pub source: String,
    /// Batch fallback when a row names no category.
    #[serde(default)]
    pub default_category: Option<String>,
}

impl Default for PromoteConfig {
    fn default() -> Self {
        Self {
            weight: default_promote_weight(),
            source: default_promote_source(),
            default_category: None,
        }
    }
}

fn default_promote_weight() -> f64 {
    0.4
}
fn default_promote_source() -> String {
    "auto".to_string()
}

pub const SORT_CHOICES: &[&str] = &["stars", "forks", "help-wanted-issues", "updated"];
pub const ORDER_CHOICES: &[&str] = &["asc", "desc"];

/// Load and validate a config file. A missing file means built-in defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::minimal()
    };
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints. Also run after CLI overrides.
pub fn validate(config: &Config) -> Result<()> {
    let h = &config.harvest;
    if h.per_page == 0 || h.per_page > 100 {
        anyhow::bail!("harvest.per_page must be in 1..=100");
    }
    if h.pages_per_query == 0 {
        anyhow::bail!("harvest.pages_per_query must be >= 1");
    }
    if h.workers == 0 {
        anyhow::bail!("harvest.workers must be >= 1");
    }
    if h.max_terms == 0 {
        anyhow::bail!("harvest.max_terms must be >= 1");
    }
    if h.max_attempts == 0 {
        anyhow::bail!("harvest.max_attempts must be >= 1");
    }
    if !SORT_CHOICES.contains(&h.sort.as_str()) {
        anyhow::bail!(
            "Unknown harvest.sort: '{}'. Must be one of: {}",
            h.sort,
            SORT_CHOICES.join(", ")
        );
    }
    if !ORDER_CHOICES.contains(&h.order.as_str()) {
        anyhow::bail!("Unknown harvest.order: '{}'. Must be asc or desc.", h.order);
    }
    h.filters.qualifiers()?;
    for shape in &h.shapes {
        if shape.categories.is_empty() {
            anyhow::bail!("harvest.shapes entries must list at least one category");
        }
        if !shape.weight.is_finite() || shape.weight < 0.0 {
            anyhow::bail!("harvest.shapes weight must be >= 0 ({})", shape.name());
        }
    }

    let x = &config.extract;
    if x.description_weight < 0.0 || x.topic_weight <= x.description_weight {
        anyhow::bail!("extract.topic_weight must be greater than extract.description_weight (both >= 0)");
    }

    let p = &config.promote;
    if !p.weight.is_finite() || p.weight <= 0.0 {
        anyhow::bail!("promote.weight must be > 0");
    }

    if config.github.per_request_timeout().is_zero() {
        anyhow::bail!("github.timeout_secs must be > 0");
    }
    Ok(())
}

impl GithubConfig {
    pub fn per_request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    /// The API token, if the configured variable is set and non-empty.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}
