//! # CAE Harvester CLI (`caeh`)
//!
//! ## Usage
//!
//! ```bash
//! caeh --config ./config/caeh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `caeh init` | Create the database and seed the keyword dictionary |
//! | `caeh harvest` | Compose, reserve and run new search queries |
//! | `caeh enrich` | Backfill topics for repos that have none |
//! | `caeh extract` | Mine keyword candidates from discovered repos |
//! | `caeh promote` | Promote a candidate (or a CSV batch) into the dictionary |
//! | `caeh reject` | Reject a pending candidate |
//! | `caeh keywords` | List, pause, resume or reweight keywords |
//! | `caeh export` | Export repos or candidates as CSV |
//! | `caeh stats` | Show a database overview |
//!
//! A missing config file is not an error: built-in defaults are used and
//! the database lives at `./data/cae.sqlite`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use cae_harvester::config::{self, Config};
use cae_harvester::gateway::GitHubClient;
use cae_harvester::harvest::{run_harvest, HarvestOptions};
use cae_harvester::progress::ProgressMode;
use cae_harvester::sqlite_store::SqliteStore;
use cae_harvester::{enrich, export, extract, migrate, promote, stats};
use cae_harvester_core::models::{CandidateStatus, KeywordStatus, UpsertChange};
use cae_harvester_core::promote::BatchDefaults;
use cae_harvester_core::store::{CandidateStore, KeywordSource};

/// CAE Harvester: self-expanding GitHub discovery for simulation software.
#[derive(Parser)]
#[command(
    name = "caeh",
    about = "CAE Harvester — self-expanding, provenance-tracked GitHub discovery for simulation repositories",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means built-in defaults.
    #[arg(long, global = true, default_value = "./config/caeh.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to human when stderr is a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema and seed keywords. Safe to re-run.
    Init,

    /// Run harvest steps: each step composes, reserves and executes one query.
    Harvest(HarvestArgs),

    /// Fetch repo details to backfill missing topics.
    Enrich {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Mine keyword candidates from the most recently seen repos.
    Extract {
        #[arg(long = "limit_repos", alias = "limit-repos")]
        limit_repos: Option<usize>,
        #[arg(long = "top_n", alias = "top-n")]
        top_n: Option<usize>,
    },

    /// Promote a term, or every row of a CSV, into the keyword dictionary.
    Promote {
        /// Term to promote (omit with --csv).
        term: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        source: Option<String>,
        /// CSV with columns term, category, suggested_category, weight, source.
        #[arg(long, conflicts_with = "term")]
        csv: Option<PathBuf>,
    },

    /// Reject a pending candidate.
    Reject { term: String },

    /// Inspect and edit the keyword dictionary.
    Keywords {
        #[command(subcommand)]
        action: KeywordAction,
    },

    /// Export data as CSV.
    Export {
        #[arg(value_enum)]
        what: ExportKind,
        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Candidate status filter.
        #[arg(long)]
        status: Option<CandidateStatus>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show database statistics.
    Stats,
}

#[derive(clap::Args)]
struct HarvestArgs {
    #[arg(long)]
    steps: Option<usize>,
    #[arg(long = "per_page", alias = "per-page")]
    per_page: Option<u32>,
    #[arg(long = "pages_per_query", alias = "pages-per-query")]
    pages_per_query: Option<u32>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    workers: Option<usize>,
    /// stars | forks | help-wanted-issues | updated
    #[arg(long)]
    sort: Option<String>,
    /// asc | desc
    #[arg(long)]
    order: Option<String>,
    #[arg(long)]
    min_stars: Option<i64>,
    #[arg(long)]
    max_stars: Option<i64>,
    #[arg(long)]
    min_forks: Option<i64>,
    #[arg(long)]
    max_forks: Option<i64>,
    #[arg(long)]
    min_watchers: Option<i64>,
    #[arg(long)]
    max_watchers: Option<i64>,
    #[arg(long)]
    min_topics: Option<i64>,
    #[arg(long)]
    max_topics: Option<i64>,
}

impl HarvestArgs {
    fn apply(self, config: &mut Config) {
        let h = &mut config.harvest;
        if let Some(v) = self.steps {
            h.steps = v;
        }
        if let Some(v) = self.per_page {
            h.per_page = v;
        }
        if let Some(v) = self.pages_per_query {
            h.pages_per_query = v;
        }
        if let Some(v) = self.seed {
            h.seed = v;
        }
        if let Some(v) = self.workers {
            h.workers = v;
        }
        if let Some(v) = self.sort {
            h.sort = v;
        }
        if let Some(v) = self.order {
            h.order = v;
        }
        let f = &mut h.filters;
        f.min_stars = self.min_stars.or(f.min_stars);
        f.max_stars = self.max_stars.or(f.max_stars);
        f.min_forks = self.min_forks.or(f.min_forks);
        f.max_forks = self.max_forks.or(f.max_forks);
        f.min_followers = self.min_watchers.or(f.min_followers);
        f.max_followers = self.max_watchers.or(f.max_followers);
        f.min_topics = self.min_topics.or(f.min_topics);
        f.max_topics = self.max_topics.or(f.max_topics);
    }
}

#[derive(Subcommand)]
enum KeywordAction {
    /// List keywords (active only unless --all).
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Pause a keyword; it stops being sampled but is never deleted.
    Pause {
        term: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Resume a paused keyword.
    Resume {
        term: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Change a keyword's sampling weight.
    Weight {
        term: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        weight: f64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportKind {
    Repos,
    Candidates,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => {
            let seeded = migrate::run_migrations(&cfg).await?;
            println!(
                "Database initialized at {} ({} keywords seeded).",
                cfg.db.path.display(),
                seeded
            );
        }
        Commands::Harvest(args) => {
            args.apply(&mut cfg);
            config::validate(&cfg)?;
            let options = HarvestOptions::from_config(&cfg.harvest)?;
            let store = Arc::new(SqliteStore::open(&cfg).await?);
            let client = GitHubClient::new(&cfg.github, &cfg.harvest.sort, &cfg.harvest.order)?;

            let summary = run_harvest(
                Arc::clone(&store),
                Arc::new(client),
                &options,
                Arc::from(progress.reporter()),
            )
            .await?;
            store.close().await;

            println!(
                "Harvest {}: steps={} executed={} failed={} resumed={} new_repos={} hits={}",
                summary.run_id,
                summary.steps,
                summary.executed,
                summary.failed,
                summary.resumed,
                summary.new_repos,
                summary.hits
            );
            if summary.exhausted {
                println!(
                    "Stopped early: coverage exhausted after {} of {} steps. Promote new keywords to widen the space.",
                    summary.steps, options.steps
                );
            }
        }
        Commands::Enrich { limit } => {
            let store = SqliteStore::open(&cfg).await?;
            let client = GitHubClient::new(&cfg.github, &cfg.harvest.sort, &cfg.harvest.order)?;
            let reporter = progress.reporter();
            let summary = enrich::run_enrich(
                &store,
                &client,
                limit.unwrap_or(cfg.enrich.limit),
                reporter.as_ref(),
            )
            .await?;
            store.close().await;
            println!(
                "Enriched {} of {} repos ({} without topics, {} failed).",
                summary.enriched, summary.targeted, summary.still_empty, summary.failed
            );
        }
        Commands::Extract { limit_repos, top_n } => {
            let store = SqliteStore::open(&cfg).await?;
            let report = extract::run_extract(
                &store,
                &cfg.extract,
                limit_repos.unwrap_or(cfg.extract.limit_repos),
                top_n.unwrap_or(cfg.extract.top_n),
            )
            .await?;
            store.close().await;
            println!(
                "Scanned {} repos: {} contributions ({} new, {} already counted), {} new candidates.",
                report.repos_scanned,
                report.contributions,
                report.applied.applied,
                report.applied.skipped,
                report.applied.new_candidates
            );
            print!("{}", extract::format_top(&report));
        }
        Commands::Promote {
            term,
            category,
            weight,
            source,
            csv,
        } => {
            let store = SqliteStore::open(&cfg).await?;
            let weight = weight.unwrap_or(cfg.promote.weight);
            let source = source.unwrap_or_else(|| cfg.promote.source.clone());
            let category = category.or_else(|| cfg.promote.default_category.clone());

            match (term, csv) {
                (_, Some(path)) => {
                    let defaults = BatchDefaults {
                        category,
                        weight,
                        source,
                    };
                    let report = promote::promote_csv(&store, &path, &defaults).await?;
                    for err in &report.errors {
                        eprintln!("skipped {}", err);
                    }
                    println!(
                        "Promoted {} rows: {} created, {} reactivated, {} unchanged; {} rejected.",
                        report.promoted(),
                        report.created.len(),
                        report.reactivated.len(),
                        report.unchanged.len(),
                        report.errors.len()
                    );
                }
                (Some(term), None) => {
                    let category = match category {
                        Some(c) => c,
                        None => match store.get_candidate(&term).await?.and_then(|c| c.suggested_category) {
                            Some(c) => c,
                            None => bail!("--category is required for '{}'", term),
                        },
                    };
                    let outcome = cae_harvester_core::promote::promote(
                        &store, &store, &term, &category, weight, &source,
                    )
                    .await?;
                    let verb = match outcome.change {
                        UpsertChange::Created => "Promoted",
                        UpsertChange::Reactivated => "Reactivated",
                        UpsertChange::Unchanged => "Already active:",
                    };
                    println!(
                        "{} {}/{} (weight {})",
                        verb, outcome.keyword.category, outcome.keyword.term, outcome.keyword.weight
                    );
                }
                (None, None) => bail!("promote needs a TERM or --csv FILE"),
            }
            store.close().await;
        }
        Commands::Reject { term } => {
            let store = SqliteStore::open(&cfg).await?;
            cae_harvester_core::promote::reject(&store, &term).await?;
            store.close().await;
            println!("Rejected {}", term);
        }
        Commands::Keywords { action } => {
            let store = SqliteStore::open(&cfg).await?;
            run_keywords(&store, action).await?;
            store.close().await;
        }
        Commands::Export {
            what,
            out,
            status,
            limit,
        } => {
            let store = SqliteStore::open(&cfg).await?;
            let writer = export::open_output(out.as_deref())?;
            let rows = match what {
                ExportKind::Repos => export::export_repos(&store, writer).await?,
                ExportKind::Candidates => {
                    export::export_candidates(&store, status, limit, writer).await?
                }
            };
            store.close().await;
            if let Some(path) = &out {
                println!("Wrote {} rows to {}", rows, path.display());
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_keywords(store: &SqliteStore, action: KeywordAction) -> Result<()> {
    match action {
        KeywordAction::List { category, all } => {
            let mut keywords = if all {
                store.list_all().await?
            } else {
                store.list_active(None).await?
            };
            if let Some(c) = category {
                keywords.retain(|k| k.category == c);
            }
            println!(
                "{:<10} {:<32} {:>6}  {:<7} {}",
                "CATEGORY", "TERM", "WEIGHT", "STATUS", "SOURCE"
            );
            for k in &keywords {
                println!(
                    "{:<10} {:<32} {:>6.2}  {:<7} {}",
                    k.category,
                    k.term,
                    k.weight,
                    k.status.as_str(),
                    k.source
                );
            }
        }
        KeywordAction::Pause { term, category } => {
            let n = store
                .set_status(&term, category.as_deref(), KeywordStatus::Paused)
                .await?;
            println!("Paused {} keyword(s) matching '{}'", n, term);
        }
        KeywordAction::Resume { term, category } => {
            let n = store
                .set_status(&term, category.as_deref(), KeywordStatus::Active)
                .await?;
            println!("Resumed {} keyword(s) matching '{}'", n, term);
        }
        KeywordAction::Weight {
            term,
            category,
            weight,
        } => {
            if !store
                .set_weight(&term, &category, weight)
                .await
                .context("Failed to set weight")?
            {
                bail!("no keyword '{}' in category '{}'", term, category);
            }
            println!("Set {}/{} weight to {}", category, term, weight);
        }
    }
    Ok(())
}
