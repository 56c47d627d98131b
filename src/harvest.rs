//! The harvest loop: compose → reserve → search → record → mark executed.
//!
//! A run of `steps` first retries queries left pending by an interrupted
//! run (oldest first), then composes new ones. Each step is one query:
//!
//! 1. Read a fresh snapshot of the active keywords.
//! 2. Compose and atomically reserve a novel query string.
//! 3. Fetch up to `pages_per_query` pages from the [`SearchGateway`].
//! 4. Record every result with [`RepoStore::record_hit`] under the recipe's tags.
//! 5. Only after every page is recorded, mark the query executed.
//!
//! A gateway failure leaves the query pending (with `last_error` set) so a
//! later run retries it. Because hits are unique per `(query, repo)`, the
//! retry never duplicates provenance.
//!
//! With `workers > 1`, workers run as tokio tasks sharing the store and the
//! gateway; each owns a composer seeded with `seed + worker_index` and claims
//! steps from a shared counter. Coverage exhaustion stops the worker that
//! hit it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use cae_harvester_core::compose::{ComposerConfig, QueryComposer};
use cae_harvester_core::models::Tags;
use cae_harvester_core::store::HarvestStore;
use cae_harvester_core::ComposeError;

use crate::config::HarvestConfig;
use crate::gateway::SearchGateway;
use crate::progress::{HarvestProgressEvent, HarvestProgressReporter};

/// Parameters of one harvest run.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub steps: usize,
    pub per_page: u32,
    pub pages_per_query: u32,
    pub seed: u64,
    pub workers: usize,
    pub composer: ComposerConfig,
}

impl HarvestOptions {
    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        Ok(Self {
            steps: config.steps,
            per_page: config.per_page,
            pages_per_query: config.pages_per_query,
            seed: config.seed,
            workers: config.workers,
            composer: config.composer()?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct HarvestSummary {
    pub run_id: String,
    /// Queries attempted, pending retries included.
    pub steps: usize,
    pub executed: usize,
    pub failed: usize,
    pub resumed: usize,
    pub new_repos: u64,
    pub hits: u64,
    /// A worker stopped early because no novel query could be composed.
    pub exhausted: bool,
}

impl HarvestSummary {
    fn absorb(&mut self, tally: &Tally) {
        self.steps += tally.steps;
        self.executed += tally.executed;
        self.failed += tally.failed;
        self.new_repos += tally.new_repos;
        self.hits += tally.hits;
        self.exhausted |= tally.exhausted;
    }
}

#[derive(Debug, Default)]
struct Tally {
    steps: usize,
    executed: usize,
    failed: usize,
    new_repos: u64,
    hits: u64,
    exhausted: bool,
}

enum Outcome {
    Executed { hits: u64, new_repos: u64 },
    Failed,
}

impl Tally {
    fn record(&mut self, outcome: Outcome) {
        self.steps += 1;
        match outcome {
            Outcome::Executed { hits, new_repos } => {
                self.executed += 1;
                self.hits += hits;
                self.new_repos += new_repos;
            }
            Outcome::Failed => self.failed += 1,
        }
    }
}

/// Run a harvest against `store` using `gateway` for search.
pub async fn run_harvest<S>(
    store: Arc<S>,
    gateway: Arc<dyn SearchGateway>,
    options: &HarvestOptions,
    reporter: Arc<dyn HarvestProgressReporter>,
) -> Result<HarvestSummary>
where
    S: HarvestStore + 'static,
{
    let run_id = uuid::Uuid::new_v4().to_string();
    let span = info_span!("harvest", run_id = %run_id);

    async move {
        let mut summary = HarvestSummary {
            run_id: run_id.clone(),
            ..Default::default()
        };
        info!(
            steps = options.steps,
            per_page = options.per_page,
            pages_per_query = options.pages_per_query,
            workers = options.workers,
            "harvest started"
        );

        let pending = store.pending(options.steps).await?;
        if !pending.is_empty() {
            reporter.report(HarvestProgressEvent::Resuming {
                pending: pending.len(),
            });
        }
        let mut resumed = Tally::default();
        for (i, query) in pending.iter().enumerate() {
            reporter.report(HarvestProgressEvent::Query {
                worker: 0,
                step: i + 1,
                steps: options.steps,
                query: query.query.clone(),
            });
            let tags = query.recipe.tags();
            let outcome = execute_query(
                store.as_ref(),
                gateway.as_ref(),
                reporter.as_ref(),
                options,
                query.id,
                &query.query,
                &tags,
            )
            .await?;
            resumed.record(outcome);
        }
        summary.resumed = pending.len();
        summary.absorb(&resumed);

        let remaining = options.steps.saturating_sub(pending.len());
        if remaining > 0 {
            let claimed = Arc::new(AtomicUsize::new(0));
            let offset = pending.len();
            let mut workers = JoinSet::new();
            for worker in 0..options.workers.max(1) {
                let ctx = WorkerCtx {
                    worker,
                    store: Arc::clone(&store),
                    gateway: Arc::clone(&gateway),
                    reporter: Arc::clone(&reporter),
                    options: options.clone(),
                    claimed: Arc::clone(&claimed),
                    remaining,
                    offset,
                };
                workers.spawn(ctx.run().in_current_span());
            }
            while let Some(joined) = workers.join_next().await {
                let tally = match joined.map_err(anyhow::Error::from).and_then(|r| r) {
                    Ok(tally) => tally,
                    Err(e) => {
                        // Stop the other workers before they reserve more queries.
                        workers.abort_all();
                        while workers.join_next().await.is_some() {}
                        return Err(e);
                    }
                };
                summary.absorb(&tally);
            }
        }

        info!(
            steps = summary.steps,
            executed = summary.executed,
            failed = summary.failed,
            new_repos = summary.new_repos,
            hits = summary.hits,
            exhausted = summary.exhausted,
            "harvest finished"
        );
        Ok(summary)
    }
    .instrument(span)
    .await
}

struct WorkerCtx<S> {
    worker: usize,
    store: Arc<S>,
    gateway: Arc<dyn SearchGateway>,
    reporter: Arc<dyn HarvestProgressReporter>,
    options: HarvestOptions,
    claimed: Arc<AtomicUsize>,
    remaining: usize,
    offset: usize,
}

impl<S: HarvestStore + 'static> WorkerCtx<S> {
    async fn run(self) -> Result<Tally> {
        let mut composer = QueryComposer::new(
            self.options.composer.clone(),
            self.options.seed.wrapping_add(self.worker as u64),
        );
        let mut tally = Tally::default();

        loop {
            let step = self.claimed.fetch_add(1, Ordering::SeqCst);
            if step >= self.remaining {
                break;
            }

            let keywords = self.store.list_active(None).await?;
            let composed = match composer.compose(&keywords, self.store.as_ref()).await {
                Ok(composed) => composed,
                Err(ComposeError::CoverageExhausted { attempts }) => {
                    warn!(worker = self.worker, attempts, "coverage exhausted; stopping worker");
                    self.reporter.report(HarvestProgressEvent::Exhausted {
                        worker: self.worker,
                        attempts,
                    });
                    tally.exhausted = true;
                    break;
                }
                Err(ComposeError::NoKeywords) => {
                    warn!(worker = self.worker, "no active keywords; stopping worker");
                    self.reporter.report(HarvestProgressEvent::Exhausted {
                        worker: self.worker,
                        attempts: 0,
                    });
                    tally.exhausted = true;
                    break;
                }
                Err(ComposeError::Store(e)) => return Err(e),
            };
            debug!(
                worker = self.worker,
                query_id = composed.query_id,
                attempts = composed.attempts,
                shape = %composed.recipe.shape,
                "query reserved"
            );

            self.reporter.report(HarvestProgressEvent::Query {
                worker: self.worker,
                step: self.offset + step + 1,
                steps: self.options.steps,
                query: composed.query.clone(),
            });
            let outcome = execute_query(
                self.store.as_ref(),
                self.gateway.as_ref(),
                self.reporter.as_ref(),
                &self.options,
                composed.query_id,
                &composed.query,
                &composed.recipe.tags(),
            )
            .await?;
            tally.record(outcome);
        }

        Ok(tally)
    }
}

/// Fetch every page of one reserved query and record it.
///
/// Gateway failures are recorded on the query and reported as
/// [`Outcome::Failed`]; store failures abort the run.
async fn execute_query<S: HarvestStore>(
    store: &S,
    gateway: &dyn SearchGateway,
    reporter: &dyn HarvestProgressReporter,
    options: &HarvestOptions,
    query_id: i64,
    query: &str,
    tags: &Tags,
) -> Result<Outcome> {
    let mut total_count = None;
    let mut hits = 0u64;
    let mut new_repos = 0u64;

    for page in 1..=options.pages_per_query.max(1) {
        let result = match gateway.search(query, page, options.per_page).await {
            Ok(result) => result,
            Err(e) => {
                let error = e.to_string();
                warn!(query_id, query, page, error = %error, "search failed; query kept pending");
                store.record_failure(query_id, &error).await?;
                reporter.report(HarvestProgressEvent::Failed { query_id, error });
                return Ok(Outcome::Failed);
            }
        };
        total_count.get_or_insert(result.total_count);

        for item in &result.items {
            let hit = store.record_hit(item, query_id, tags).await?;
            if hit.new_hit {
                hits += 1;
            }
            if hit.new_repo {
                new_repos += 1;
            }
        }
        reporter.report(HarvestProgressEvent::Page {
            query_id,
            page,
            items: result.items.len(),
            total_count: result.total_count,
        });

        if !result.has_more {
            break;
        }
    }

    store.mark_executed(query_id, total_count).await?;
    reporter.report(HarvestProgressEvent::Executed {
        query_id,
        hits,
        new_repos,
    });
    Ok(Outcome::Executed { hits, new_repos })
}
