//! CSV export of the repository registry and the candidate queue.
//!
//! Set-valued columns (`merged_tags_json`, `topics_json`, `sources_json`)
//! hold JSON so a row stays one CSV record.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use cae_harvester_core::models::CandidateStatus;
use cae_harvester_core::store::{CandidateStore, RepoStore};

#[derive(Serialize)]
struct RepoRow<'a> {
    full_name: &'a str,
    html_url: Option<&'a str>,
    description: Option<&'a str>,
    merged_tags_json: String,
    topics_json: String,
    language: Option<&'a str>,
    stars: Option<i64>,
    forks: Option<i64>,
    open_issues: Option<i64>,
    license_spdx: Option<&'a str>,
    source_updated_at: Option<&'a str>,
    first_seen_at: i64,
    last_seen_at: i64,
}

#[derive(Serialize)]
struct CandidateRow<'a> {
    term: &'a str,
    suggested_category: Option<&'a str>,
    score: f64,
    occurrences: i64,
    status: &'static str,
    first_seen_at: i64,
    last_seen_at: i64,
    sources_json: String,
}

/// Open `path` for writing (creating parent directories), or stdout.
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Ok(Box::new(std::io::BufWriter::new(file)))
        }
        None => Ok(Box::new(std::io::stdout().lock())),
    }
}

/// Write every repository, most recently seen first. Returns rows written.
pub async fn export_repos<W: Write>(store: &dyn RepoStore, out: W) -> Result<usize> {
    let repos = store.recent_repos(None).await?;
    let mut writer = csv::Writer::from_writer(out);
    for repo in &repos {
        writer.serialize(RepoRow {
            full_name: &repo.full_name,
            html_url: repo.html_url.as_deref(),
            description: repo.description.as_deref(),
            merged_tags_json: serde_json::to_string(&repo.merged_tags)?,
            topics_json: serde_json::to_string(&repo.topics)?,
            language: repo.language.as_deref(),
            stars: repo.stars,
            forks: repo.forks,
            open_issues: repo.open_issues,
            license_spdx: repo.license.as_deref(),
            source_updated_at: repo.source_updated_at.as_deref(),
            first_seen_at: repo.first_seen_at,
            last_seen_at: repo.last_seen_at,
        })?;
    }
    writer.flush()?;
    Ok(repos.len())
}

/// Write candidates best first, optionally filtered by status.
pub async fn export_candidates<W: Write>(
    store: &dyn CandidateStore,
    status: Option<CandidateStatus>,
    limit: Option<usize>,
    out: W,
) -> Result<usize> {
    let candidates = store.candidates(status, limit).await?;
    let mut writer = csv::Writer::from_writer(out);
    for c in &candidates {
        writer.serialize(CandidateRow {
            term: &c.term,
            suggested_category: c.suggested_category.as_deref(),
            score: c.score,
            occurrences: c.occurrences,
            status: c.status.as_str(),
            first_seen_at: c.first_seen_at,
            last_seen_at: c.last_seen_at,
            sources_json: serde_json::to_string(&c.sources)?,
        })?;
    }
    writer.flush()?;
    Ok(candidates.len())
}
