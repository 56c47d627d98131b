//! Batch promotion input: CSV rows with `term`, `category`,
//! `suggested_category`, `weight` and `source` columns. Only `term` is
//! required per row; missing columns are treated as empty.

use std::path::Path;

use anyhow::{Context, Result};

use cae_harvester_core::promote::{promote_batch, BatchDefaults, BatchReport, BatchRow};
use cae_harvester_core::store::{CandidateStore, KeywordSource};

/// Parse a promotion CSV. Header names are matched case-insensitively.
pub fn read_batch<R: std::io::Read>(reader: R) -> Result<Vec<BatchRow>> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: csv::StringRecord = csv
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();
    csv.set_headers(headers);

    let mut rows = Vec::new();
    for (idx, record) in csv.deserialize::<BatchRow>().enumerate() {
        let row = record.with_context(|| format!("Malformed CSV at data row {}", idx + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Promote every row of the CSV at `path`.
pub async fn promote_csv<S>(store: &S, path: &Path, defaults: &BatchDefaults) -> Result<BatchReport>
where
    S: KeywordSource + CandidateStore,
{
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let rows = read_batch(file)?;
    let report = promote_batch(store, store, &rows, defaults).await?;
    Ok(report)
}
