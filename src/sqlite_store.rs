//! SQLite-backed implementation of every store trait.
//!
//! The atomicity the harvest relies on comes from unique constraints:
//!
//! | Operation | Constraint |
//! |-----------|------------|
//! | [`QueryCache::reserve`] | `queries.query UNIQUE` + `ON CONFLICT DO NOTHING RETURNING id` |
//! | [`RepoStore::record_hit`] | `repo_hits UNIQUE(query_id, repo_full_name)`, `repo_tags` primary key |
//! | [`CandidateStore::apply_contributions`] | `candidate_sources` primary key `(term, repo, field)` |
//!
//! Write transactions always start with a write statement so SQLite takes
//! the reserved lock up front and `busy_timeout` serializes writers.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use cae_harvester_core::models::{
    normalize_term, ApplyReport, CandidateSource, CandidateStatus, Contribution, HitOutcome,
    Keyword, KeywordCandidate, KeywordStatus, NewKeyword, Query, RawRepo, Recipe, Repo, RepoHit,
    Reservation, SourceField, Tags, UpsertChange, UpsertOutcome,
};
use cae_harvester_core::query::canonicalize_query;
use cae_harvester_core::store::{CandidateStore, KeywordSource, QueryCache, RepoStore};

use crate::config::Config;
use crate::db;
use crate::migrate;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn hydrate_repo(&self, row: &SqliteRow) -> Result<Repo> {
        let full_name: String = row.get("full_name");

        let tag_rows = sqlx::query(
            "SELECT category, term FROM repo_tags WHERE full_name = ? ORDER BY category, term",
        )
        .bind(&full_name)
        .fetch_all(&self.pool)
        .await?;
        let mut merged_tags = Tags::new();
        for r in &tag_rows {
            merged_tags
                .entry(r.get::<String, _>("category"))
                .or_default()
                .insert(r.get::<String, _>("term"));
        }

        let topics: BTreeSet<String> =
            sqlx::query_scalar::<_, String>("SELECT topic FROM repo_topics WHERE full_name = ?")
                .bind(&full_name)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect();

        Ok(Repo {
            html_url: row.get("html_url"),
            description: row.get("description"),
            stars: row.get("stars"),
            forks: row.get("forks"),
            open_issues: row.get("open_issues"),
            license: row.get("license"),
            language: row.get("language"),
            source_updated_at: row.get("source_updated_at"),
            first_seen_at: row.get("first_seen_at"),
            last_seen_at: row.get("last_seen_at"),
            topics_checked_at: row.get("topics_checked_at"),
            full_name,
            merged_tags,
            topics,
        })
    }

    async fn hydrate_candidate(&self, row: &SqliteRow) -> Result<KeywordCandidate> {
        let term: String = row.get("term");
        let source_rows = sqlx::query(
            "SELECT repo_full_name, field, count FROM candidate_sources
             WHERE term = ? ORDER BY seen_at, repo_full_name, field",
        )
        .bind(&term)
        .fetch_all(&self.pool)
        .await?;

        let mut sources = Vec::with_capacity(source_rows.len());
        for r in &source_rows {
            sources.push(CandidateSource {
                repo_full_name: r.get("repo_full_name"),
                field: r.get::<String, _>("field").parse()?,
                count: r.get("count"),
            });
        }

        Ok(KeywordCandidate {
            suggested_category: row.get("suggested_category"),
            score: row.get("score"),
            occurrences: row.get("occurrences"),
            status: row.get::<String, _>("status").parse()?,
            first_seen_at: row.get("first_seen_at"),
            last_seen_at: row.get("last_seen_at"),
            term,
            sources,
        })
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// SQLite treats a negative `LIMIT` as unbounded.
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(-1)
}

fn keyword_from_row(row: &SqliteRow) -> Result<Keyword> {
    Ok(Keyword {
        id: row.get("id"),
        category: row.get("category"),
        term: row.get("term"),
        weight: row.get("weight"),
        status: row.get::<String, _>("status").parse()?,
        source: row.get("source"),
    })
}

fn query_from_row(row: &SqliteRow) -> Result<Query> {
    let recipe_json: String = row.get("recipe_json");
    let recipe: Recipe = serde_json::from_str(&recipe_json)
        .with_context(|| format!("Corrupt recipe for query {}", row.get::<i64, _>("id")))?;
    Ok(Query {
        id: row.get("id"),
        query: row.get("query"),
        recipe,
        reserved_at: row.get("reserved_at"),
        executed_at: row.get("executed_at"),
        total_count: row.get("total_count"),
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
    })
}

const KEYWORD_COLUMNS: &str = "id, category, term, weight, status, source";
const QUERY_COLUMNS: &str =
    "id, query, recipe_json, reserved_at, executed_at, total_count, attempts, last_error";
const REPO_COLUMNS: &str = "full_name, html_url, description, stars, forks, open_issues, license, \
     language, source_updated_at, first_seen_at, last_seen_at, topics_checked_at";
const CANDIDATE_COLUMNS: &str =
    "term, suggested_category, score, occurrences, status, first_seen_at, last_seen_at";

#[async_trait]
impl KeywordSource for SqliteStore {
    async fn list_active(&self, category: Option<&str>) -> Result<Vec<Keyword>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM keywords WHERE status = 'active' AND (?1 IS NULL OR category = ?1)
             ORDER BY category, term",
            KEYWORD_COLUMNS
        ))
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(keyword_from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<Keyword>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM keywords ORDER BY category, term",
            KEYWORD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(keyword_from_row).collect()
    }

    async fn upsert(&self, keyword: &NewKeyword) -> Result<UpsertOutcome> {
        keyword.validate()?;
        let now = now_ts();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO keywords (category, term, weight, status, source, created_at, updated_at)
             VALUES (?, ?, ?, 'active', ?, ?, ?)
             ON CONFLICT(category, term) DO NOTHING",
        )
        .bind(&keyword.category)
        .bind(&keyword.term)
        .bind(keyword.weight)
        .bind(&keyword.source)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let change = if inserted > 0 {
            UpsertChange::Created
        } else {
            let reactivated = sqlx::query(
                "UPDATE keywords SET status = 'active', weight = ?, updated_at = ?
                 WHERE category = ? AND term = ? AND status = 'paused'",
            )
            .bind(keyword.weight)
            .bind(now)
            .bind(&keyword.category)
            .bind(&keyword.term)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if reactivated > 0 {
                UpsertChange::Reactivated
            } else {
                UpsertChange::Unchanged
            }
        };

        let row = sqlx::query(&format!(
            "SELECT {} FROM keywords WHERE category = ? AND term = ?",
            KEYWORD_COLUMNS
        ))
        .bind(&keyword.category)
        .bind(&keyword.term)
        .fetch_one(&mut *tx)
        .await?;
        let stored = keyword_from_row(&row)?;
        tx.commit().await?;

        Ok(UpsertOutcome {
            keyword: stored,
            change,
        })
    }

    async fn set_status(
        &self,
        term: &str,
        category: Option<&str>,
        status: KeywordStatus,
    ) -> Result<u64> {
        let category = category.map(normalize_term);
        let result = sqlx::query(
            "UPDATE keywords SET status = ?1, updated_at = ?2
             WHERE term = ?3 AND (?4 IS NULL OR category = ?4) AND status != ?1",
        )
        .bind(status.as_str())
        .bind(now_ts())
        .bind(normalize_term(term))
        .bind(category)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_weight(&self, term: &str, category: &str, weight: f64) -> Result<bool> {
        if !weight.is_finite() || weight <= 0.0 {
            anyhow::bail!("keyword weight must be > 0 (got {})", weight);
        }
        let result = sqlx::query(
            "UPDATE keywords SET weight = ?, updated_at = ? WHERE category = ? AND term = ?",
        )
        .bind(weight)
        .bind(now_ts())
        .bind(normalize_term(category))
        .bind(normalize_term(term))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl QueryCache for SqliteStore {
    async fn reserve(&self, query: &str, recipe: &Recipe) -> Result<Reservation> {
        let canonical = canonicalize_query(query);
        if canonical.is_empty() {
            anyhow::bail!("cannot reserve an empty query");
        }
        let recipe_json = serde_json::to_string(recipe)?;

        let claimed: Option<i64> = sqlx::query_scalar(
            "INSERT INTO queries (query, recipe_json, reserved_at) VALUES (?, ?, ?)
             ON CONFLICT(query) DO NOTHING
             RETURNING id",
        )
        .bind(&canonical)
        .bind(&recipe_json)
        .bind(now_ts())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = claimed {
            return Ok(Reservation {
                query_id: id,
                already_exists: false,
            });
        }

        let id: i64 = sqlx::query_scalar("SELECT id FROM queries WHERE query = ?")
            .bind(&canonical)
            .fetch_one(&self.pool)
            .await?;
        Ok(Reservation {
            query_id: id,
            already_exists: true,
        })
    }

    async fn mark_executed(&self, query_id: i64, total_count: Option<i64>) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE queries
             SET executed_at = ?, total_count = ?, attempts = attempts + 1, last_error = NULL
             WHERE id = ? AND executed_at IS NULL",
        )
        .bind(now_ts())
        .bind(total_count)
        .bind(query_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 && self.get_query(query_id).await?.is_none() {
            anyhow::bail!("unknown query id {}", query_id);
        }
        Ok(())
    }

    async fn record_failure(&self, query_id: i64, error: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE queries SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        )
        .bind(error)
        .bind(query_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            anyhow::bail!("unknown query id {}", query_id);
        }
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<Query>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM queries WHERE executed_at IS NULL ORDER BY reserved_at, id LIMIT ?",
            QUERY_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(query_from_row).collect()
    }

    async fn get_query(&self, id: i64) -> Result<Option<Query>> {
        let row = sqlx::query(&format!("SELECT {} FROM queries WHERE id = ?", QUERY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(query_from_row).transpose()
    }
}

#[async_trait]
impl RepoStore for SqliteStore {
    async fn record_hit(
        &self,
        raw: &RawRepo,
        query_id: i64,
        tags: &Tags,
    ) -> Result<HitOutcome> {
        if raw.full_name.trim().is_empty() {
            anyhow::bail!("repository payload has no full_name");
        }
        let now = now_ts();
        let mut tx = self.pool.begin().await?;

        let new_repo = sqlx::query(
            "INSERT INTO repos (full_name, first_seen_at, last_seen_at) VALUES (?, ?, ?)
             ON CONFLICT(full_name) DO NOTHING",
        )
        .bind(&raw.full_name)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        sqlx::query(
            r#"
            UPDATE repos SET
                html_url = COALESCE(?, html_url),
                description = COALESCE(?, description),
                stars = COALESCE(?, stars),
                forks = COALESCE(?, forks),
                open_issues = COALESCE(?, open_issues),
                license = COALESCE(?, license),
                language = COALESCE(?, language),
                source_updated_at = COALESCE(?, source_updated_at),
                last_seen_at = ?
            WHERE full_name = ?
            "#,
        )
        .bind(&raw.html_url)
        .bind(&raw.description)
        .bind(raw.stars)
        .bind(raw.forks)
        .bind(raw.open_issues)
        .bind(raw.license_spdx())
        .bind(&raw.language)
        .bind(&raw.updated_at)
        .bind(now)
        .bind(&raw.full_name)
        .execute(&mut *tx)
        .await?;

        for (category, terms) in tags {
            for term in terms {
                sqlx::query(
                    "INSERT OR IGNORE INTO repo_tags (full_name, category, term) VALUES (?, ?, ?)",
                )
                .bind(&raw.full_name)
                .bind(category)
                .bind(term)
                .execute(&mut *tx)
                .await?;
            }
        }

        for topic in raw.normalized_topics() {
            sqlx::query("INSERT OR IGNORE INTO repo_topics (full_name, topic) VALUES (?, ?)")
                .bind(&raw.full_name)
                .bind(&topic)
                .execute(&mut *tx)
                .await?;
        }

        let new_hit = sqlx::query(
            "INSERT OR IGNORE INTO repo_hits (query_id, repo_full_name, seen_at, hit_tags_json)
             VALUES (?, ?, ?, ?)",
        )
        .bind(query_id)
        .bind(&raw.full_name)
        .bind(now)
        .bind(serde_json::to_string(tags)?)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to record hit for query {}", query_id))?
        .rows_affected()
            > 0;

        tx.commit().await?;
        Ok(HitOutcome { new_repo, new_hit })
    }

    async fn set_topics(&self, full_name: &str, topics: &BTreeSet<String>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE repos SET topics_checked_at = ? WHERE full_name = ?")
            .bind(now_ts())
            .bind(full_name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            anyhow::bail!("unknown repository {}", full_name);
        }
        for topic in topics.iter().map(|t| normalize_term(t)).filter(|t| !t.is_empty()) {
            sqlx::query("INSERT OR IGNORE INTO repo_topics (full_name, topic) VALUES (?, ?)")
                .bind(full_name)
                .bind(&topic)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn repos_missing_topics(&self, limit: usize) -> Result<Vec<String>> {
        let names = sqlx::query_scalar(
            "SELECT r.full_name FROM repos r
             WHERE r.topics_checked_at IS NULL
               AND NOT EXISTS (SELECT 1 FROM repo_topics t WHERE t.full_name = r.full_name)
             ORDER BY r.last_seen_at DESC, r.full_name
             LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn recent_repos(&self, limit: Option<usize>) -> Result<Vec<Repo>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM repos ORDER BY last_seen_at DESC, full_name LIMIT ?",
            REPO_COLUMNS
        ))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut repos = Vec::with_capacity(rows.len());
        for row in &rows {
            repos.push(self.hydrate_repo(row).await?);
        }
        Ok(repos)
    }

    async fn get_repo(&self, full_name: &str) -> Result<Option<Repo>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM repos WHERE full_name = ?",
            REPO_COLUMNS
        ))
        .bind(full_name)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate_repo(&row).await?)),
            None => Ok(None),
        }
    }

    async fn hits_for_repo(&self, full_name: &str) -> Result<Vec<RepoHit>> {
        let rows = sqlx::query(
            "SELECT id, query_id, repo_full_name, seen_at, hit_tags_json
             FROM repo_hits WHERE repo_full_name = ? ORDER BY id",
        )
        .bind(full_name)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let tags_json: String = row.get("hit_tags_json");
            hits.push(RepoHit {
                id: row.get("id"),
                query_id: row.get("query_id"),
                repo_full_name: row.get("repo_full_name"),
                seen_at: row.get("seen_at"),
                hit_tags: serde_json::from_str(&tags_json)
                    .with_context(|| format!("Corrupt hit tags for {}", full_name))?,
            });
        }
        Ok(hits)
    }
}

#[async_trait]
impl CandidateStore for SqliteStore {
    async fn apply_contributions(&self, contributions: &[Contribution]) -> Result<ApplyReport> {
        let now = now_ts();
        let mut report = ApplyReport::default();
        let mut tx = self.pool.begin().await?;

        for c in contributions {
            let created = sqlx::query(
                "INSERT OR IGNORE INTO keyword_candidates (term, first_seen_at, last_seen_at)
                 VALUES (?, ?, ?)",
            )
            .bind(&c.term)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                > 0;

            let fresh = sqlx::query(
                "INSERT OR IGNORE INTO candidate_sources (term, repo_full_name, field, count, score, seen_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&c.term)
            .bind(&c.repo_full_name)
            .bind(c.field.as_str())
            .bind(c.count)
            .bind(c.score)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                > 0;

            if !fresh {
                report.skipped += 1;
                continue;
            }

            sqlx::query(
                "UPDATE keyword_candidates
                 SET score = score + ?, occurrences = occurrences + ?, last_seen_at = ?
                 WHERE term = ?",
            )
            .bind(c.score)
            .bind(c.count)
            .bind(now)
            .bind(&c.term)
            .execute(&mut *tx)
            .await?;

            report.applied += 1;
            if created {
                report.new_candidates += 1;
            }
        }

        tx.commit().await?;
        Ok(report)
    }

    async fn candidates(
        &self,
        status: Option<CandidateStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<KeywordCandidate>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM keyword_candidates
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY score DESC, occurrences DESC, term ASC
             LIMIT ?2",
            CANDIDATE_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.hydrate_candidate(row).await?);
        }
        Ok(out)
    }

    async fn get_candidate(&self, term: &str) -> Result<Option<KeywordCandidate>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM keyword_candidates WHERE term = ?",
            CANDIDATE_COLUMNS
        ))
        .bind(normalize_term(term))
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate_candidate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn set_candidate_status(&self, term: &str, status: CandidateStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE keyword_candidates SET status = ? WHERE term = ?")
            .bind(status.as_str())
            .bind(normalize_term(term))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn suggest_category(&self, term: &str, category: &str) -> Result<()> {
        sqlx::query(
            "UPDATE keyword_candidates SET suggested_category = ?
             WHERE term = ? AND (suggested_category IS NULL OR suggested_category = '')",
        )
        .bind(category)
        .bind(normalize_term(term))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("data").join("test.sqlite");
        let store = SqliteStore::open(&config).await.unwrap();
        (tmp, store)
    }

    fn raw(name: &str, topics: Option<&[&str]>) -> RawRepo {
        RawRepo {
            full_name: name.into(),
            html_url: Some(format!("https://github.com/{}", name)),
            stars: Some(3),
            topics: topics.map(|t| t.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        let mut t = Tags::new();
        for (c, v) in pairs {
            t.entry(c.to_string()).or_default().insert(v.to_string());
        }
        t
    }

    #[tokio::test]
    async fn reserve_dedups_on_canonical_string() {
        let (_tmp, store) = store().await;
        let a = store.reserve("fea AND cfd", &Recipe::default()).await.unwrap();
        let b = store.reserve("CFD   fea", &Recipe::default()).await.unwrap();
        assert!(!a.already_exists);
        assert!(b.already_exists);
        assert_eq!(a.query_id, b.query_id);

        let q = store.get_query(a.query_id).await.unwrap().unwrap();
        assert_eq!(q.query, "cfd AND fea");
        assert!(q.is_pending());
    }

    #[tokio::test]
    async fn upsert_lifecycle() {
        let (_tmp, store) = store().await;
        let kw = NewKeyword::new("domain", "pic", 0.4, "manual");
        assert_eq!(store.upsert(&kw).await.unwrap().change, UpsertChange::Created);
        assert_eq!(store.upsert(&kw).await.unwrap().change, UpsertChange::Unchanged);

        assert_eq!(
            store
                .set_status("pic", Some("domain"), KeywordStatus::Paused)
                .await
                .unwrap(),
            1
        );
        assert!(store.list_active(Some("domain")).await.unwrap().is_empty());
        assert_eq!(
            store.upsert(&kw).await.unwrap().change,
            UpsertChange::Reactivated
        );
        assert!(store.set_weight("pic", "domain", 0.9).await.unwrap());
        assert!(!store.set_weight("nope", "domain", 0.9).await.unwrap());
        assert_eq!(store.list_active(None).await.unwrap()[0].weight, 0.9);
    }

    #[tokio::test]
    async fn record_hit_merges_tags_and_dedups_hits() {
        let (_tmp, store) = store().await;
        let q1 = store.reserve("fea", &Recipe::default()).await.unwrap();
        let q2 = store.reserve("cfd", &Recipe::default()).await.unwrap();

        let out = store
            .record_hit(&raw("acme/x", Some(&["FEM"])), q1.query_id, &tags(&[("method", "fea")]))
            .await
            .unwrap();
        assert_eq!(
            out,
            HitOutcome {
                new_repo: true,
                new_hit: true
            }
        );
        let again = store
            .record_hit(&raw("acme/x", None), q1.query_id, &tags(&[("method", "fea")]))
            .await
            .unwrap();
        assert!(!again.new_repo && !again.new_hit);

        store
            .record_hit(&raw("acme/x", None), q2.query_id, &tags(&[("domain", "cfd")]))
            .await
            .unwrap();

        let repo = store.get_repo("acme/x").await.unwrap().unwrap();
        assert!(repo.merged_tags["method"].contains("fea"));
        assert!(repo.merged_tags["domain"].contains("cfd"));
        assert!(repo.topics.contains("fem"));
        assert_eq!(repo.stars, Some(3));
        assert_eq!(store.hits_for_repo("acme/x").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn corrupt_hit_tags_are_reported() {
        let (_tmp, store) = store().await;
        let q = store.reserve("fea", &Recipe::default()).await.unwrap();
        store
            .record_hit(&raw("acme/y", None), q.query_id, &tags(&[("method", "fea")]))
            .await
            .unwrap();
        sqlx::query("UPDATE repo_hits SET hit_tags_json = 'not json' WHERE repo_full_name = 'acme/y'")
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.hits_for_repo("acme/y").await.unwrap_err();
        assert!(err.to_string().contains("Corrupt hit tags for acme/y"));
    }

    #[tokio::test]
    async fn failure_keeps_query_pending_until_executed() {
        let (_tmp, store) = store().await;
        let r = store.reserve("sph", &Recipe::default()).await.unwrap();
        store.record_failure(r.query_id, "HTTP 502").await.unwrap();
        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("HTTP 502"));

        store.mark_executed(r.query_id, Some(12)).await.unwrap();
        assert!(store.pending(10).await.unwrap().is_empty());
        let q = store.get_query(r.query_id).await.unwrap().unwrap();
        assert_eq!(q.total_count, Some(12));
        assert_eq!(q.attempts, 2);
        assert!(store.mark_executed(9999, None).await.is_err());
    }

    #[tokio::test]
    async fn enrichment_targets_and_checks() {
        let (_tmp, store) = store().await;
        let q = store.reserve("fea", &Recipe::default()).await.unwrap();
        store
            .record_hit(&raw("o/a", None), q.query_id, &Tags::new())
            .await
            .unwrap();
        store
            .record_hit(&raw("o/b", Some(&["cfd"])), q.query_id, &Tags::new())
            .await
            .unwrap();
        assert_eq!(store.repos_missing_topics(10).await.unwrap(), vec!["o/a"]);

        store.set_topics("o/a", &BTreeSet::new()).await.unwrap();
        assert!(store.repos_missing_topics(10).await.unwrap().is_empty());
        assert!(store.set_topics("o/zzz", &BTreeSet::new()).await.is_err());
    }

    #[tokio::test]
    async fn contributions_are_idempotent_per_source() {
        let (_tmp, store) = store().await;
        let c = Contribution {
            term: "pic".into(),
            repo_full_name: "o/a".into(),
            field: SourceField::Description,
            count: 2,
            score: 0.6,
        };
        let first = store.apply_contributions(&[c.clone()]).await.unwrap();
        assert_eq!(first.new_candidates, 1);
        let second = store.apply_contributions(&[c]).await.unwrap();
        assert_eq!(second.skipped, 1);

        let cand = store.get_candidate("pic").await.unwrap().unwrap();
        assert!((cand.score - 0.6).abs() < 1e-9);
        assert_eq!(cand.occurrences, 2);
        assert_eq!(cand.sources.len(), 1);
        assert_eq!(cand.status, CandidateStatus::Pending);

        store.suggest_category("pic", "domain").await.unwrap();
        store.suggest_category("pic", "method").await.unwrap();
        let cand = store.get_candidate("pic").await.unwrap().unwrap();
        assert_eq!(cand.suggested_category.as_deref(), Some("domain"));
        assert!(store
            .set_candidate_status("pic", CandidateStatus::Rejected)
            .await
            .unwrap());
        assert!(store
            .candidates(Some(CandidateStatus::Pending), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn negative_limit_means_unbounded() {
        assert_eq!(sql_limit(None), -1);
        assert_eq!(sql_limit(Some(5)), 5);
    }
}
