//! `caeh extract`: mine keyword candidates from recently seen repositories.

use anyhow::Result;
use tracing::info;

use cae_harvester_core::extract::{extract_candidates, ExtractReport};
use cae_harvester_core::store::{CandidateStore, KeywordSource, RepoStore};

use crate::config::ExtractSettings;

/// Score the `limit_repos` most recently seen repos and return the top
/// `top_n` pending candidates. Every computed contribution is persisted.
pub async fn run_extract<S>(
    store: &S,
    settings: &ExtractSettings,
    limit_repos: usize,
    top_n: usize,
) -> Result<ExtractReport>
where
    S: KeywordSource + RepoStore + CandidateStore,
{
    let repos = store.recent_repos(Some(limit_repos)).await?;
    let report = extract_candidates(&repos, store, store, top_n, &settings.scoring()).await?;
    info!(
        repos = report.repos_scanned,
        contributions = report.contributions,
        applied = report.applied.applied,
        new_candidates = report.applied.new_candidates,
        "extraction finished"
    );
    Ok(report)
}

/// Render the top candidates as a fixed-width table.
pub fn format_top(report: &ExtractReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<32} {:>8} {:>6}  {}\n",
        "TERM", "SCORE", "OCC", "CATEGORY"
    ));
    for c in &report.top {
        out.push_str(&format!(
            "{:<32} {:>8.2} {:>6}  {}\n",
            c.term,
            c.score,
            c.occurrences,
            c.suggested_category.as_deref().unwrap_or("-")
        ));
    }
    out
}
