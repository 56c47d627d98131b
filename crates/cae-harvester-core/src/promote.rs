//! Reviewed promotion of candidates into the keyword dictionary.
//!
//! ```text
//! pending ──promote──▶ promoted
//!    │
//!    └────reject────▶ rejected
//! ```
//!
//! Both transitions are terminal. Promotion upserts the keyword, so
//! promoting an already active term is a no-op and promoting a paused one
//! reactivates it. A term with no candidate row can still be promoted
//! (manual keywords).

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::WorkflowError;
use crate::models::{normalize_term, CandidateStatus, Keyword, NewKeyword, UpsertChange, UpsertOutcome};
use crate::store::{CandidateStore, KeywordSource};

/// Promote `term` into `category` as an active keyword.
pub async fn promote(
    keywords: &dyn KeywordSource,
    candidates: &dyn CandidateStore,
    term: &str,
    category: &str,
    weight: f64,
    source: &str,
) -> Result<UpsertOutcome, WorkflowError> {
    let keyword = NewKeyword::new(category, term, weight, source);
    keyword
        .validate()
        .map_err(|e| WorkflowError::Invalid(e.to_string()))?;
    promote_keyword(keywords, candidates, &keyword).await
}

async fn promote_keyword(
    keywords: &dyn KeywordSource,
    candidates: &dyn CandidateStore,
    keyword: &NewKeyword,
) -> Result<UpsertOutcome, WorkflowError> {
    let candidate = candidates.get_candidate(&keyword.term).await?;
    if let Some(c) = &candidate {
        if c.status == CandidateStatus::Rejected {
            return Err(WorkflowError::InvalidTransition {
                term: keyword.term.clone(),
                from: c.status,
                to: CandidateStatus::Promoted,
            });
        }
    }

    let outcome = keywords.upsert(keyword).await?;
    if candidate.is_some_and(|c| c.status == CandidateStatus::Pending) {
        candidates
            .set_candidate_status(&keyword.term, CandidateStatus::Promoted)
            .await?;
    }

    info!(
        term = %keyword.term,
        category = %keyword.category,
        change = ?outcome.change,
        "keyword promoted"
    );
    Ok(outcome)
}

/// Move a pending candidate to `rejected`.
pub async fn reject(candidates: &dyn CandidateStore, term: &str) -> Result<(), WorkflowError> {
    let term = normalize_term(term);
    let candidate = candidates
        .get_candidate(&term)
        .await?
        .ok_or_else(|| WorkflowError::UnknownCandidate(term.clone()))?;
    if candidate.status.is_terminal() {
        return Err(WorkflowError::InvalidTransition {
            term,
            from: candidate.status,
            to: CandidateStatus::Rejected,
        });
    }
    candidates
        .set_candidate_status(&term, CandidateStatus::Rejected)
        .await?;
    debug!(term = %term, "candidate rejected");
    Ok(())
}

/// One row of a batch promotion file. Every column is optional so that
/// malformed rows can be reported individually.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BatchRow {
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub suggested_category: Option<String>,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchDefaults {
    /// Used when a row has neither `category` nor `suggested_category`.
    pub category: Option<String>,
    pub weight: f64,
    pub source: String,
}

impl Default for BatchDefaults {
    fn default() -> Self {
        Self {
            category: None,
            weight: 0.4,
            source: "auto".to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub created: Vec<Keyword>,
    pub reactivated: Vec<Keyword>,
    pub unchanged: Vec<Keyword>,
    /// One [`WorkflowError::Validation`] per rejected row.
    pub errors: Vec<WorkflowError>,
}

impl BatchReport {
    pub fn promoted(&self) -> usize {
        self.created.len() + self.reactivated.len() + self.unchanged.len()
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve a row into a keyword, or explain why it cannot be promoted.
fn resolve_row(row: &BatchRow, defaults: &BatchDefaults) -> Result<NewKeyword, String> {
    let term = non_blank(&row.term).ok_or("missing term")?;
    let category = non_blank(&row.category)
        .or_else(|| non_blank(&row.suggested_category))
        .or(defaults.category.as_deref())
        .ok_or_else(|| format!("no category for '{}'", term))?;
    let weight = match non_blank(&row.weight) {
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|_| format!("invalid weight '{}' for '{}'", raw, term))?,
        None => defaults.weight,
    };
    let source = non_blank(&row.source).unwrap_or(&defaults.source);

    let keyword = NewKeyword::new(category, term, weight, source);
    keyword.validate().map_err(|e| e.to_string())?;
    Ok(keyword)
}

/// Promote every valid row; invalid rows are reported, not fatal.
///
/// Row numbers in errors are 1-based data rows. Store failures abort the
/// batch; rows already promoted stay promoted.
pub async fn promote_batch(
    keywords: &dyn KeywordSource,
    candidates: &dyn CandidateStore,
    rows: &[BatchRow],
    defaults: &BatchDefaults,
) -> Result<BatchReport, WorkflowError> {
    let mut report = BatchReport::default();

    for (idx, row) in rows.iter().enumerate() {
        let row_no = idx + 1;
        let keyword = match resolve_row(row, defaults) {
            Ok(k) => k,
            Err(reason) => {
                report.errors.push(WorkflowError::Validation {
                    row: row_no,
                    reason,
                });
                continue;
            }
        };

        match promote_keyword(keywords, candidates, &keyword).await {
            Ok(outcome) => match outcome.change {
                UpsertChange::Created => report.created.push(outcome.keyword),
                UpsertChange::Reactivated => report.reactivated.push(outcome.keyword),
                UpsertChange::Unchanged => report.unchanged.push(outcome.keyword),
            },
            Err(e @ WorkflowError::Store(_)) => return Err(e),
            Err(e) => report.errors.push(WorkflowError::Validation {
                row: row_no,
                reason: e.to_string(),
            }),
        }
    }

    Ok(report)
}
