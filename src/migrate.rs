//! Idempotent schema creation and keyword seeding.
//!
//! Every statement is `CREATE ... IF NOT EXISTS` or `INSERT OR IGNORE`, so
//! `caeh init` can be re-run at any time without touching existing data.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

use cae_harvester_core::seed::seed_keywords;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS keywords (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        category TEXT NOT NULL,
        term TEXT NOT NULL,
        weight REAL NOT NULL CHECK (weight > 0),
        status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'paused')),
        source TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE(category, term)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS queries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        query TEXT NOT NULL UNIQUE,
        recipe_json TEXT NOT NULL,
        reserved_at INTEGER NOT NULL,
        executed_at INTEGER,
        total_count INTEGER,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS repos (
        full_name TEXT PRIMARY KEY,
        html_url TEXT,
        description TEXT,
        stars INTEGER,
        forks INTEGER,
        open_issues INTEGER,
        license TEXT,
        language TEXT,
        source_updated_at TEXT,
        first_seen_at INTEGER NOT NULL,
        last_seen_at INTEGER NOT NULL,
        topics_checked_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS repo_tags (
        full_name TEXT NOT NULL,
        category TEXT NOT NULL,
        term TEXT NOT NULL,
        PRIMARY KEY (full_name, category, term),
        FOREIGN KEY (full_name) REFERENCES repos(full_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS repo_topics (
        full_name TEXT NOT NULL,
        topic TEXT NOT NULL,
        PRIMARY KEY (full_name, topic),
        FOREIGN KEY (full_name) REFERENCES repos(full_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS repo_hits (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        query_id INTEGER NOT NULL,
        repo_full_name TEXT NOT NULL,
        seen_at INTEGER NOT NULL,
        hit_tags_json TEXT NOT NULL DEFAULT '{}',
        UNIQUE(query_id, repo_full_name),
        FOREIGN KEY (query_id) REFERENCES queries(id),
        FOREIGN KEY (repo_full_name) REFERENCES repos(full_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS keyword_candidates (
        term TEXT PRIMARY KEY,
        suggested_category TEXT,
        score REAL NOT NULL DEFAULT 0,
        occurrences INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'promoted', 'rejected')),
        first_seen_at INTEGER NOT NULL,
        last_seen_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS candidate_sources (
        term TEXT NOT NULL,
        repo_full_name TEXT NOT NULL,
        field TEXT NOT NULL CHECK (field IN ('description', 'topic')),
        count INTEGER NOT NULL,
        score REAL NOT NULL,
        seen_at INTEGER NOT NULL,
        PRIMARY KEY (term, repo_full_name, field),
        FOREIGN KEY (term) REFERENCES keyword_candidates(term)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_queries_pending ON queries(executed_at, reserved_at)",
    "CREATE INDEX IF NOT EXISTS idx_repo_hits_repo ON repo_hits(repo_full_name)",
    "CREATE INDEX IF NOT EXISTS idx_repos_last_seen ON repos(last_seen_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_candidates_status_score ON keyword_candidates(status, score DESC)",
];

/// Create all tables and indexes on an open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for &statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Migration failed: {}", statement.trim()))?;
    }
    Ok(())
}

/// Insert the built-in vocabulary. Existing `(category, term)` rows,
/// paused ones included, are left untouched. Returns rows inserted.
pub async fn seed(pool: &SqlitePool) -> Result<u64> {
    let now = chrono::Utc::now().timestamp();
    let mut inserted = 0;
    for kw in seed_keywords() {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO keywords (category, term, weight, status, source, created_at, updated_at)
             VALUES (?, ?, ?, 'active', ?, ?, ?)",
        )
        .bind(&kw.category)
        .bind(&kw.term)
        .bind(kw.weight)
        .bind(&kw.source)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }
    debug!(inserted, "seed keywords applied");
    Ok(inserted)
}

/// `caeh init`: create the schema and seed keywords.
pub async fn run_migrations(config: &Config) -> Result<u64> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    let seeded = seed(&pool).await?;
    pool.close().await;
    Ok(seeded)
}
