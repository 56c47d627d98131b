//! Candidate keyword mining from repository descriptions and topics.
//!
//! Extraction is lexical. Descriptions are split into word tokens; topics
//! are taken whole. Stop-words, generic words, and terms the dictionary
//! already knows are dropped. Every surviving `(term, repo, field)` yields
//! one [`Contribution`] worth `count x field weight`, and the store applies
//! each identity at most once, so re-scanning overlapping repo sets never
//! double counts.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{
    normalize_term, ApplyReport, CandidateStatus, Contribution, Keyword, KeywordCandidate, Repo,
    SourceField,
};
use crate::store::{CandidateStore, KeywordSource};

/// Tokens too common to be useful as search keywords.
pub const STOPWORDS: &[&str] = &[
    "the", "and", "or", "a", "an", "for", "to", "of", "in", "on", "with", "by", "this", "that",
    "based", "using", "use", "uses", "used", "from", "code", "codes", "project", "repo",
    "repository", "library", "framework", "tool", "tools", "software", "open", "source",
    "opensource", "open-source", "solver", "simulation", "simulator", "engine", "github",
    "gitlab", "example", "examples", "tutorial", "docs", "documentation",
];

const GENERIC_WORDS: &[&str] = &["readme", "docs", "doc", "test", "tests"];

const HPC_TERMS: &[&str] = &["mpi", "openmp", "cuda", "gpu", "petsc", "trilinos", "hypre"];
const METHOD_TERMS: &[&str] = &[
    "fem",
    "fea",
    "finite-element",
    "finite-volume",
    "fvm",
    "fdm",
    "fdtd",
    "bem",
    "lbm",
    "sph",
    "mpm",
    "ray-tracing",
    "path-tracing",
];
const INTENT_TERMS: &[&str] = &["solver", "simulation", "simulator", "engine", "multiphysics"];

/// Minimum keyword length for the related-term filter. Shorter keywords
/// (`dg`) would match inside almost anything.
const RELATED_MIN_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Score per topic occurrence. Must exceed `description_weight`.
    pub topic_weight: f64,
    pub description_weight: f64,
    /// Also drop terms that contain, or are contained in, a known keyword.
    pub skip_related_terms: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            topic_weight: 1.0,
            description_weight: 0.3,
            skip_related_terms: true,
        }
    }
}

impl ExtractConfig {
    fn weight(&self, field: SourceField) -> f64 {
        match field {
            SourceField::Topic => self.topic_weight,
            SourceField::Description => self.description_weight,
        }
    }
}

/// Terms already in the dictionary, active or paused.
#[derive(Debug, Clone, Default)]
pub struct KnownTerms {
    terms: BTreeSet<String>,
    skip_related: bool,
}

impl KnownTerms {
    pub fn new(keywords: &[Keyword], skip_related: bool) -> Self {
        Self {
            terms: keywords.iter().map(|k| normalize_term(&k.term)).collect(),
            skip_related,
        }
    }

    pub fn covers(&self, term: &str) -> bool {
        if self.terms.contains(term) {
            return true;
        }
        self.skip_related
            && self.terms.iter().any(|kw| {
                kw.len() >= RELATED_MIN_LEN && (term.contains(kw.as_str()) || kw.contains(term))
            })
    }
}

fn is_stopword(term: &str) -> bool {
    STOPWORDS.contains(&term)
}

fn is_token(term: &str) -> bool {
    let mut chars = term.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_lowercase() || first.is_ascii_digit())
        && (3..=49).contains(&term.len())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Split free text into candidate tokens.
pub fn tokenize_description(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .filter(|t| !t.is_empty())
        .filter(|t| !is_stopword(t))
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| is_token(t))
        .filter(|t| !GENERIC_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// A topic label as a candidate term, or `None` if it is noise.
pub fn normalize_topic(topic: &str) -> Option<String> {
    let term = normalize_term(topic);
    if term.is_empty() || is_stopword(&term) {
        None
    } else {
        Some(term)
    }
}

/// Heuristic category for a mined term.
pub fn infer_category(term: &str) -> Option<&'static str> {
    if HPC_TERMS.contains(&term) {
        Some("hpc")
    } else if METHOD_TERMS.contains(&term) {
        Some("method")
    } else if INTENT_TERMS.contains(&term) {
        Some("intent")
    } else {
        None
    }
}

/// Score every unseen term in `repos`, one contribution per
/// `(term, repo, field)`.
pub fn contributions(repos: &[Repo], known: &KnownTerms, config: &ExtractConfig) -> Vec<Contribution> {
    let mut out = Vec::new();

    for repo in repos {
        let mut counts: BTreeMap<(String, SourceField), i64> = BTreeMap::new();

        if let Some(desc) = &repo.description {
            for token in tokenize_description(desc) {
                *counts.entry((token, SourceField::Description)).or_default() += 1;
            }
        }
        for topic in &repo.topics {
            if let Some(term) = normalize_topic(topic) {
                *counts.entry((term, SourceField::Topic)).or_default() += 1;
            }
        }

        for ((term, field), count) in counts {
            if known.covers(&term) {
                continue;
            }
            out.push(Contribution {
                score: count as f64 * config.weight(field),
                term,
                repo_full_name: repo.full_name.clone(),
                field,
                count,
            });
        }
    }

    out
}

#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    pub repos_scanned: usize,
    pub contributions: usize,
    pub applied: ApplyReport,
    /// Candidates that received a suggested category in this run.
    pub suggested: usize,
    /// Pending candidates after this run, best first.
    pub top: Vec<KeywordCandidate>,
}

/// Mine `repos`, persist all scores, and return the top `top_n` pending
/// candidates.
///
/// Reads a fresh dictionary snapshot from `keywords` before scoring.
pub async fn extract_candidates(
    repos: &[Repo],
    keywords: &dyn KeywordSource,
    store: &dyn CandidateStore,
    top_n: usize,
    config: &ExtractConfig,
) -> Result<ExtractReport> {
    let known = KnownTerms::new(&keywords.list_all().await?, config.skip_related_terms);
    let batch = contributions(repos, &known, config);
    let applied = store.apply_contributions(&batch).await?;
    debug!(
        repos = repos.len(),
        contributions = batch.len(),
        applied = applied.applied,
        skipped = applied.skipped,
        "candidate contributions applied"
    );

    let mut top = store
        .candidates(Some(CandidateStatus::Pending), Some(top_n))
        .await?;
    let mut suggested = 0;
    for candidate in top.iter_mut() {
        if candidate.suggested_category.is_some() {
            continue;
        }
        if let Some(category) = infer_category(&candidate.term) {
            store.suggest_category(&candidate.term, category).await?;
            candidate.suggested_category = Some(category.to_string());
            suggested += 1;
        }
    }

    Ok(ExtractReport {
        repos_scanned: repos.len(),
        contributions: batch.len(),
        applied,
        suggested,
        top,
    })
}
