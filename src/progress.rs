//! Harvest and enrichment progress reporting.
//!
//! Reports what a long-running `caeh harvest` or `caeh enrich` is doing so
//! users see which query runs, how many pages came back, and when the
//! keyword space is exhausted. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum HarvestProgressEvent {
    /// Pending queries from an interrupted run are about to be retried.
    Resuming { pending: usize },
    /// A worker starts executing a query.
    Query {
        worker: usize,
        step: usize,
        steps: usize,
        query: String,
    },
    /// One result page was recorded.
    Page {
        query_id: i64,
        page: u32,
        items: usize,
        total_count: i64,
    },
    /// All pages of a query are recorded and it is marked executed.
    Executed {
        query_id: i64,
        hits: u64,
        new_repos: u64,
    },
    /// The gateway gave up; the query stays pending.
    Failed { query_id: i64, error: String },
    /// A worker found no novel query to run.
    Exhausted { worker: usize, attempts: usize },
    /// Enrichment progress: n repositories processed out of total.
    Enriching { n: u64, total: u64 },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait HarvestProgressReporter: Send + Sync {
    fn report(&self, event: HarvestProgressEvent);
}

/// Human-friendly progress on stderr: "[3/100] fea AND openfoam".
pub struct StderrProgress;

impl HarvestProgressReporter for StderrProgress {
    fn report(&self, event: HarvestProgressEvent) {
        let line = match &event {
            HarvestProgressEvent::Resuming { pending } => {
                format!("harvest  resuming {} pending queries\n", pending)
            }
            HarvestProgressEvent::Query {
                worker,
                step,
                steps,
                query,
            } => format!("[{}/{}] w{}  {}\n", step, steps, worker, query),
            HarvestProgressEvent::Page {
                query_id,
                page,
                items,
                total_count,
            } => format!(
                "  q{} page {}: {} items (total_count={})\n",
                query_id,
                page,
                items,
                format_number(*total_count as u64)
            ),
            HarvestProgressEvent::Executed {
                query_id,
                hits,
                new_repos,
            } => format!(
                "  q{} done: {} hits, {} new repos\n",
                query_id, hits, new_repos
            ),
            HarvestProgressEvent::Failed { query_id, error } => {
                format!("  q{} failed (kept pending): {}\n", query_id, error)
            }
            HarvestProgressEvent::Exhausted { worker, attempts } => format!(
                "w{}  coverage exhausted after {} attempts\n",
                worker, attempts
            ),
            HarvestProgressEvent::Enriching { n, total } => format!(
                "enrich  {} / {} repos\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl HarvestProgressReporter for JsonProgress {
    fn report(&self, event: HarvestProgressEvent) {
        let obj = match &event {
            HarvestProgressEvent::Resuming { pending } => serde_json::json!({
                "event": "resuming",
                "pending": pending
            }),
            HarvestProgressEvent::Query {
                worker,
                step,
                steps,
                query,
            } => serde_json::json!({
                "event": "query",
                "worker": worker,
                "step": step,
                "steps": steps,
                "query": query
            }),
            HarvestProgressEvent::Page {
                query_id,
                page,
                items,
                total_count,
            } => serde_json::json!({
                "event": "page",
                "query_id": query_id,
                "page": page,
                "items": items,
                "total_count": total_count
            }),
            HarvestProgressEvent::Executed {
                query_id,
                hits,
                new_repos,
            } => serde_json::json!({
                "event": "executed",
                "query_id": query_id,
                "hits": hits,
                "new_repos": new_repos
            }),
            HarvestProgressEvent::Failed { query_id, error } => serde_json::json!({
                "event": "failed",
                "query_id": query_id,
                "error": error
            }),
            HarvestProgressEvent::Exhausted { worker, attempts } => serde_json::json!({
                "event": "exhausted",
                "worker": worker,
                "attempts": attempts
            }),
            HarvestProgressEvent::Enriching { n, total } => serde_json::json!({
                "event": "enriching",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl HarvestProgressReporter for NoProgress {
    fn report(&self, _event: HarvestProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn HarvestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
