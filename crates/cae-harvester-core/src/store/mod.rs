//! Storage abstraction for the harvester.
//!
//! Each capability is its own trait so components only see what they use:
//! the composer needs a [`QueryCache`], extraction needs a
//! [`KeywordSource`] and a [`CandidateStore`], and so on. The SQLite
//! backend in the `cae-harvester` crate implements all four, as does
//! [`memory::InMemoryStore`].
//!
//! Implementations must be `Send + Sync` and must make [`QueryCache::reserve`],
//! [`RepoStore::record_hit`] and [`CandidateStore::apply_contributions`]
//! safe to call concurrently and safe to retry.

pub mod memory;

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ApplyReport, CandidateStatus, Contribution, HitOutcome, Keyword, KeywordCandidate,
    KeywordStatus, NewKeyword, Query, RawRepo, Recipe, Repo, RepoHit, Reservation, Tags,
    UpsertOutcome,
};

/// The keyword dictionary.
///
/// There is no delete: keywords are paused instead, so recipes stored with
/// historical queries keep their meaning.
#[async_trait]
pub trait KeywordSource: Send + Sync {
    /// Active keywords, optionally restricted to one category, ordered by
    /// `(category, term)`.
    async fn list_active(&self, category: Option<&str>) -> Result<Vec<Keyword>>;

    /// Every keyword regardless of status.
    async fn list_all(&self) -> Result<Vec<Keyword>>;

    /// Insert `(category, term)` as active, or reactivate it if paused.
    /// An already active keyword is left untouched.
    async fn upsert(&self, keyword: &NewKeyword) -> Result<UpsertOutcome>;

    /// Set the status of `term` in `category`, or in every category when
    /// `None`. Returns the number of keywords changed.
    async fn set_status(
        &self,
        term: &str,
        category: Option<&str>,
        status: KeywordStatus,
    ) -> Result<u64>;

    /// Returns `false` if no such keyword exists.
    async fn set_weight(&self, term: &str, category: &str, weight: f64) -> Result<bool>;
}

/// Query deduplication and execution state.
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Atomically claim a query string.
    ///
    /// The string is canonicalized first. Exactly one caller ever sees
    /// `already_exists == false` for a given canonical string.
    async fn reserve(&self, query: &str, recipe: &Recipe) -> Result<Reservation>;

    /// Mark a query executed. Executed queries are never re-run.
    async fn mark_executed(&self, query_id: i64, total_count: Option<i64>) -> Result<()>;

    /// Record a failed execution attempt. The query stays pending.
    async fn record_failure(&self, query_id: i64, error: &str) -> Result<()>;

    /// Pending queries, oldest reservation first.
    async fn pending(&self, limit: usize) -> Result<Vec<Query>>;

    async fn get_query(&self, id: i64) -> Result<Option<Query>>;
}

/// The repository registry with hit provenance.
#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Upsert the repository and append a `(query, repo)` provenance edge.
    ///
    /// Scalar metadata is last-writer-wins; `tags` and any topics in the
    /// payload are unioned into what is stored. Recording the same
    /// `(query, repo)` pair twice adds no second hit.
    async fn record_hit(&self, repo: &RawRepo, query_id: i64, tags: &Tags)
        -> Result<HitOutcome>;

    /// Union enrichment topics and stamp `topics_checked_at`.
    async fn set_topics(&self, full_name: &str, topics: &BTreeSet<String>) -> Result<()>;

    /// Repos with no topics that were never checked, most recently seen first.
    async fn repos_missing_topics(&self, limit: usize) -> Result<Vec<String>>;

    /// Repos, most recently seen first. `None` returns all of them.
    async fn recent_repos(&self, limit: Option<usize>) -> Result<Vec<Repo>>;

    async fn get_repo(&self, full_name: &str) -> Result<Option<Repo>>;

    async fn hits_for_repo(&self, full_name: &str) -> Result<Vec<RepoHit>>;
}

/// Mined keyword candidates.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Add contributions whose `(term, repo, field)` was not seen before.
    async fn apply_contributions(&self, contributions: &[Contribution]) -> Result<ApplyReport>;

    /// Candidates ordered by score desc, occurrences desc, term asc.
    async fn candidates(
        &self,
        status: Option<CandidateStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<KeywordCandidate>>;

    async fn get_candidate(&self, term: &str) -> Result<Option<KeywordCandidate>>;

    /// Returns `false` if the term has no candidate.
    async fn set_candidate_status(&self, term: &str, status: CandidateStatus) -> Result<bool>;

    async fn suggest_category(&self, term: &str, category: &str) -> Result<()>;
}

/// Everything a harvest run touches.
pub trait HarvestStore: KeywordSource + QueryCache + RepoStore {}

impl<T: KeywordSource + QueryCache + RepoStore> HarvestStore for T {}

/// Total order used by [`CandidateStore::candidates`].
pub fn candidate_order(a: &KeywordCandidate, b: &KeywordCandidate) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.occurrences.cmp(&a.occurrences))
        .then_with(|| a.term.cmp(&b.term))
}
