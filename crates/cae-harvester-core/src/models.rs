//! Core data models shared by every harvester component.
//!
//! Timestamps are Unix seconds (`i64`), matching the SQLite schema.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Accumulated tags of a repository: category → set of terms.
///
/// `BTreeMap`/`BTreeSet` keep serialization deterministic.
pub type Tags = BTreeMap<String, BTreeSet<String>>;

/// Normalize a keyword or candidate term: trim, lowercase, collapse
/// inner whitespace to single spaces.
pub fn normalize_term(term: &str) -> String {
    term.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Union `incoming` into `existing`. Returns `true` if anything was added.
pub fn merge_tags(existing: &mut Tags, incoming: &Tags) -> bool {
    let mut changed = false;
    for (category, terms) in incoming {
        let entry = existing.entry(category.clone()).or_default();
        for term in terms {
            changed |= entry.insert(term.clone());
        }
    }
    changed
}

/// Flatten tags into the set of terms regardless of category.
pub fn tag_terms(tags: &Tags) -> BTreeSet<String> {
    tags.values().flatten().cloned().collect()
}

// ============ Keywords ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordStatus {
    Active,
    Paused,
}

impl KeywordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordStatus::Active => "active",
            KeywordStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for KeywordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeywordStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(KeywordStatus::Active),
            "paused" => Ok(KeywordStatus::Paused),
            other => anyhow::bail!("unknown keyword status: '{}'", other),
        }
    }
}

/// A dictionary entry used to compose queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: i64,
    pub category: String,
    pub term: String,
    /// Relative sampling mass within the category. Always > 0.
    pub weight: f64,
    pub status: KeywordStatus,
    /// Who created it: `manual`, `auto`, `seed`, ...
    pub source: String,
}

/// Input to [`KeywordSource::upsert`](crate::store::KeywordSource::upsert).
#[derive(Debug, Clone, PartialEq)]
pub struct NewKeyword {
    pub category: String,
    pub term: String,
    pub weight: f64,
    pub source: String,
}

impl NewKeyword {
    pub fn new(category: &str, term: &str, weight: f64, source: &str) -> Self {
        Self {
            category: normalize_term(category),
            term: normalize_term(term),
            weight,
            source: source.trim().to_string(),
        }
    }

    /// Reject empty fields and non-positive or non-finite weights.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.term.is_empty() {
            anyhow::bail!("keyword term must not be empty");
        }
        if self.category.is_empty() {
            anyhow::bail!("keyword category must not be empty (term '{}')", self.term);
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            anyhow::bail!(
                "keyword weight must be > 0 (term '{}', got {})",
                self.term,
                self.weight
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertChange {
    /// The `(category, term)` pair did not exist.
    Created,
    /// A paused entry was switched back to active.
    Reactivated,
    /// Already active; nothing changed.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub keyword: Keyword,
    pub change: UpsertChange,
}

// ============ Queries ============

/// One keyword used to build a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeEntry {
    #[serde(default)]
    pub keyword_id: Option<i64>,
    pub category: String,
    pub term: String,
}

/// How a query string was constructed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Recipe {
    /// Name of the recipe shape, e.g. `domain+method+intent`.
    pub shape: String,
    /// Widening level the composer was at (0 = base shape).
    #[serde(default)]
    pub width: usize,
    /// Keywords in sampling order.
    pub keywords: Vec<RecipeEntry>,
    /// Search qualifiers appended to the terms.
    #[serde(default)]
    pub qualifiers: Vec<String>,
}

impl Recipe {
    /// Tags attributed to every repository this recipe's query surfaces.
    pub fn tags(&self) -> Tags {
        let mut tags = Tags::new();
        for entry in &self.keywords {
            tags.entry(entry.category.clone())
                .or_default()
                .insert(entry.term.clone());
        }
        tags
    }

    pub fn terms(&self) -> Vec<String> {
        self.keywords.iter().map(|k| k.term.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub id: i64,
    pub query: String,
    pub recipe: Recipe,
    pub reserved_at: i64,
    pub executed_at: Option<i64>,
    pub total_count: Option<i64>,
    pub attempts: i64,
    pub last_error: Option<String>,
}

impl Query {
    pub fn is_pending(&self) -> bool {
        self.executed_at.is_none()
    }
}

/// Result of [`QueryCache::reserve`](crate::store::QueryCache::reserve).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub query_id: i64,
    /// `true` if another caller (or an earlier run) already owns this string.
    pub already_exists: bool,
}

// ============ Repositories ============

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawLicense {
    #[serde(default)]
    pub spdx_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A repository record as returned by the search or details API.
///
/// Field names follow the GitHub REST payload so the gateway can
/// deserialize items directly.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawRepo {
    pub full_name: String,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default, rename = "url")]
    pub api_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// `None` means the payload carried no topics at all (needs enrichment).
    #[serde(default)]
    pub topics: Option<Vec<String>>,
    #[serde(default, rename = "stargazers_count")]
    pub stars: Option<i64>,
    #[serde(default, rename = "forks_count")]
    pub forks: Option<i64>,
    #[serde(default, rename = "open_issues_count")]
    pub open_issues: Option<i64>,
    #[serde(default)]
    pub license: Option<RawLicense>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl RawRepo {
    pub fn license_spdx(&self) -> Option<String> {
        self.license.as_ref().and_then(|l| l.spdx_id.clone())
    }

    /// Topics normalized and deduplicated; empty when absent.
    pub fn normalized_topics(&self) -> BTreeSet<String> {
        self.topics
            .iter()
            .flatten()
            .map(|t| normalize_term(t))
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Canonical stored repository.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Repo {
    pub full_name: String,
    pub html_url: Option<String>,
    pub description: Option<String>,
    pub stars: Option<i64>,
    pub forks: Option<i64>,
    pub open_issues: Option<i64>,
    pub license: Option<String>,
    pub language: Option<String>,
    pub source_updated_at: Option<String>,
    pub merged_tags: Tags,
    pub topics: BTreeSet<String>,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    pub topics_checked_at: Option<i64>,
}

/// Provenance edge: which query surfaced which repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoHit {
    pub id: i64,
    pub query_id: i64,
    pub repo_full_name: String,
    pub seen_at: i64,
    pub hit_tags: Tags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HitOutcome {
    pub new_repo: bool,
    /// `false` when this `(query, repo)` pair was already recorded.
    pub new_hit: bool,
}

// ============ Candidates ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Pending,
    Promoted,
    Rejected,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Promoted => "promoted",
            CandidateStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CandidateStatus::Pending)
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandidateStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CandidateStatus::Pending),
            "promoted" => Ok(CandidateStatus::Promoted),
            "rejected" => Ok(CandidateStatus::Rejected),
            other => anyhow::bail!("unknown candidate status: '{}'", other),
        }
    }
}

/// Which repository field a candidate term came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceField {
    Description,
    Topic,
}

impl SourceField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceField::Description => "description",
            SourceField::Topic => "topic",
        }
    }
}

impl FromStr for SourceField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "description" => Ok(SourceField::Description),
            "topic" => Ok(SourceField::Topic),
            other => anyhow::bail!("unknown source field: '{}'", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSource {
    pub repo_full_name: String,
    pub field: SourceField,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordCandidate {
    pub term: String,
    pub suggested_category: Option<String>,
    pub score: f64,
    pub occurrences: i64,
    pub sources: Vec<CandidateSource>,
    pub status: CandidateStatus,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
}

/// One repository field's evidence for a term.
///
/// Identified by `(term, repo_full_name, field)`; stores apply each
/// identity at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub term: String,
    pub repo_full_name: String,
    pub field: SourceField,
    pub count: i64,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyReport {
    pub applied: usize,
    /// Contributions whose `(term, repo, field)` was already recorded.
    pub skipped: usize,
    pub new_candidates: usize,
}
