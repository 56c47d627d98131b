//! Database statistics and health overview.
//!
//! Used by `caeh stats` to show how far the harvest has come: dictionary
//! size per category, executed versus pending queries, registry coverage,
//! and the candidate queue.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Per-category keyword counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryStats {
    pub category: String,
    pub active: i64,
    pub paused: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub categories: Vec<CategoryStats>,
    pub queries_executed: i64,
    pub queries_pending: i64,
    /// Pending queries whose last attempt failed.
    pub queries_failing: i64,
    pub repos: i64,
    pub repos_with_topics: i64,
    pub hits: i64,
    pub candidates_pending: i64,
    pub candidates_promoted: i64,
    pub candidates_rejected: i64,
    pub last_executed_at: Option<i64>,
}

async fn count(pool: &SqlitePool, sql: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).fetch_one(pool).await?)
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<Stats> {
    let category_rows = sqlx::query(
        r#"
        SELECT
            category,
            SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END) AS active,
            SUM(CASE WHEN status = 'paused' THEN 1 ELSE 0 END) AS paused
        FROM keywords
        GROUP BY category
        ORDER BY category
        "#,
    )
    .fetch_all(pool)
    .await?;

    let categories = category_rows
        .iter()
        .map(|row| CategoryStats {
            category: row.get("category"),
            active: row.get("active"),
            paused: row.get("paused"),
        })
        .collect();

    let candidate_rows =
        sqlx::query("SELECT status, COUNT(*) AS n FROM keyword_candidates GROUP BY status")
            .fetch_all(pool)
            .await?;
    let mut stats = Stats {
        categories,
        queries_executed: count(pool, "SELECT COUNT(*) FROM queries WHERE executed_at IS NOT NULL")
            .await?,
        queries_pending: count(pool, "SELECT COUNT(*) FROM queries WHERE executed_at IS NULL")
            .await?,
        queries_failing: count(
            pool,
            "SELECT COUNT(*) FROM queries WHERE executed_at IS NULL AND last_error IS NOT NULL",
        )
        .await?,
        repos: count(pool, "SELECT COUNT(*) FROM repos").await?,
        repos_with_topics: count(pool, "SELECT COUNT(DISTINCT full_name) FROM repo_topics")
            .await?,
        hits: count(pool, "SELECT COUNT(*) FROM repo_hits").await?,
        last_executed_at: sqlx::query_scalar("SELECT MAX(executed_at) FROM queries")
            .fetch_one(pool)
            .await?,
        ..Default::default()
    };
    for row in &candidate_rows {
        let n: i64 = row.get("n");
        match row.get::<String, _>("status").as_str() {
            "pending" => stats.candidates_pending = n,
            "promoted" => stats.candidates_promoted = n,
            "rejected" => stats.candidates_rejected = n,
            _ => {}
        }
    }
    Ok(stats)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let stats = collect_stats(store.pool()).await?;
    store.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("CAE Harvester — Database Stats");
    println!("==============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!(
        "  Queries:     {} executed, {} pending ({} failing)",
        stats.queries_executed, stats.queries_pending, stats.queries_failing
    );
    println!(
        "  Last run:    {}",
        stats
            .last_executed_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "  Repos:       {} ({} with topics, {}%)",
        stats.repos,
        stats.repos_with_topics,
        if stats.repos > 0 {
            (stats.repos_with_topics * 100) / stats.repos
        } else {
            0
        }
    );
    println!("  Hits:        {}", stats.hits);
    println!(
        "  Candidates:  {} pending, {} promoted, {} rejected",
        stats.candidates_pending, stats.candidates_promoted, stats.candidates_rejected
    );

    if !stats.categories.is_empty() {
        println!();
        println!("  Keywords by category:");
        println!("  {:<16} {:>8} {:>8}", "CATEGORY", "ACTIVE", "PAUSED");
        println!("  {}", "-".repeat(34));
        for c in &stats.categories {
            println!("  {:<16} {:>8} {:>8}", c.category, c.active, c.paused);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
