//! In-memory implementation of every store trait.
//!
//! All tables live behind one `RwLock`, so each trait method is a single
//! critical section and therefore atomic. Used by unit tests and by
//! callers that embed the core without SQLite.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{
    merge_tags, normalize_term, ApplyReport, CandidateSource, CandidateStatus, Contribution,
    HitOutcome, Keyword, KeywordCandidate, KeywordStatus, NewKeyword, Query, RawRepo, Recipe,
    Repo, RepoHit, Reservation, SourceField, Tags, UpsertChange, UpsertOutcome,
};
use crate::query::canonicalize_query;

use super::{candidate_order, CandidateStore, KeywordSource, QueryCache, RepoStore};

#[derive(Default)]
struct State {
    keywords: BTreeMap<(String, String), Keyword>,
    next_keyword_id: i64,

    queries: Vec<Query>,
    query_ids: HashMap<String, i64>,

    repos: HashMap<String, Repo>,
    hits: Vec<RepoHit>,
    hit_keys: HashSet<(i64, String)>,

    candidates: HashMap<String, KeywordCandidate>,
    contribution_keys: HashSet<(String, String, SourceField)>,
}

/// Store backed by plain collections.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl KeywordSource for InMemoryStore {
    async fn list_active(&self, category: Option<&str>) -> Result<Vec<Keyword>> {
        let state = self.read()?;
        Ok(state
            .keywords
            .values()
            .filter(|k| k.status == KeywordStatus::Active)
            .filter(|k| category.map_or(true, |c| k.category == c))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Keyword>> {
        Ok(self.read()?.keywords.values().cloned().collect())
    }

    async fn upsert(&self, keyword: &NewKeyword) -> Result<UpsertOutcome> {
        keyword.validate()?;
        let mut state = self.write()?;
        let key = (keyword.category.clone(), keyword.term.clone());

        if let Some(existing) = state.keywords.get_mut(&key) {
            let change = match existing.status {
                KeywordStatus::Active => UpsertChange::Unchanged,
                KeywordStatus::Paused => {
                    existing.status = KeywordStatus::Active;
                    existing.weight = keyword.weight;
                    UpsertChange::Reactivated
                }
            };
            return Ok(UpsertOutcome {
                keyword: existing.clone(),
                change,
            });
        }

        state.next_keyword_id += 1;
        let created = Keyword {
            id: state.next_keyword_id,
            category: keyword.category.clone(),
            term: keyword.term.clone(),
            weight: keyword.weight,
            status: KeywordStatus::Active,
            source: keyword.source.clone(),
        };
        state.keywords.insert(key, created.clone());
        Ok(UpsertOutcome {
            keyword: created,
            change: UpsertChange::Created,
        })
    }

    async fn set_status(
        &self,
        term: &str,
        category: Option<&str>,
        status: KeywordStatus,
    ) -> Result<u64> {
        let term = normalize_term(term);
        let category = category.map(normalize_term);
        let mut state = self.write()?;
        let mut changed = 0;
        for kw in state.keywords.values_mut() {
            if kw.term == term
                && category.as_deref().map_or(true, |c| kw.category == c)
                && kw.status != status
            {
                kw.status = status;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn set_weight(&self, term: &str, category: &str, weight: f64) -> Result<bool> {
        if !weight.is_finite() || weight <= 0.0 {
            anyhow::bail!("keyword weight must be > 0 (got {})", weight);
        }
        let key = (normalize_term(category), normalize_term(term));
        let mut state = self.write()?;
        Ok(match state.keywords.get_mut(&key) {
            Some(kw) => {
                kw.weight = weight;
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl QueryCache for InMemoryStore {
    async fn reserve(&self, query: &str, recipe: &Recipe) -> Result<Reservation> {
        let canonical = canonicalize_query(query);
        if canonical.is_empty() {
            anyhow::bail!("cannot reserve an empty query");
        }
        let mut state = self.write()?;
        if let Some(&id) = state.query_ids.get(&canonical) {
            return Ok(Reservation {
                query_id: id,
                already_exists: true,
            });
        }
        let id = state.queries.len() as i64 + 1;
        state.queries.push(Query {
            id,
            query: canonical.clone(),
            recipe: recipe.clone(),
            reserved_at: now_ts(),
            executed_at: None,
            total_count: None,
            attempts: 0,
            last_error: None,
        });
        state.query_ids.insert(canonical, id);
        Ok(Reservation {
            query_id: id,
            already_exists: false,
        })
    }

    async fn mark_executed(&self, query_id: i64, total_count: Option<i64>) -> Result<()> {
        let mut state = self.write()?;
        let q = query_mut(&mut state, query_id)?;
        if q.executed_at.is_none() {
            q.executed_at = Some(now_ts());
            q.total_count = total_count;
            q.attempts += 1;
            q.last_error = None;
        }
        Ok(())
    }

    async fn record_failure(&self, query_id: i64, error: &str) -> Result<()> {
        let mut state = self.write()?;
        let q = query_mut(&mut state, query_id)?;
        q.attempts += 1;
        q.last_error = Some(error.to_string());
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<Query>> {
        let state = self.read()?;
        Ok(state
            .queries
            .iter()
            .filter(|q| q.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_query(&self, id: i64) -> Result<Option<Query>> {
        let state = self.read()?;
        Ok(state.queries.iter().find(|q| q.id == id).cloned())
    }
}

fn query_mut(state: &mut State, id: i64) -> Result<&mut Query> {
    state
        .queries
        .iter_mut()
        .find(|q| q.id == id)
        .ok_or_else(|| anyhow!("unknown query id {}", id))
}

#[async_trait]
impl RepoStore for InMemoryStore {
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
        let mut state = self.write()?;
        if !state.queries.iter().any(|q| q.id == query_id) {
            anyhow::bail!("unknown query id {}", query_id);
        }

        let new_repo = !state.repos.contains_key(&raw.full_name);
        let repo = state
            .repos
            .entry(raw.full_name.clone())
            .or_insert_with(|| Repo {
                full_name: raw.full_name.clone(),
                first_seen_at: now,
                ..Default::default()
            });

        if raw.html_url.is_some() {
            repo.html_url = raw.html_url.clone();
        }
        if raw.description.is_some() {
            repo.description = raw.description.clone();
        }
        repo.stars = raw.stars.or(repo.stars);
        repo.forks = raw.forks.or(repo.forks);
        repo.open_issues = raw.open_issues.or(repo.open_issues);
        if let Some(spdx) = raw.license_spdx() {
            repo.license = Some(spdx);
        }
        if raw.language.is_some() {
            repo.language = raw.language.clone();
        }
        if raw.updated_at.is_some() {
            repo.source_updated_at = raw.updated_at.clone();
        }
        repo.topics.extend(raw.normalized_topics());
        merge_tags(&mut repo.merged_tags, tags);
        repo.last_seen_at = now;

        let new_hit = state.hit_keys.insert((query_id, raw.full_name.clone()));
        if new_hit {
            let id = state.hits.len() as i64 + 1;
            state.hits.push(RepoHit {
                id,
                query_id,
                repo_full_name: raw.full_name.clone(),
                seen_at: now,
                hit_tags: tags.clone(),
            });
        }

        Ok(HitOutcome { new_repo, new_hit })
    }

    async fn set_topics(&self, full_name: &str, topics: &BTreeSet<String>) -> Result<()> {
        let mut state = self.write()?;
        let repo = state
            .repos
            .get_mut(full_name)
            .ok_or_else(|| anyhow!("unknown repository {}", full_name))?;
        repo.topics
            .extend(topics.iter().map(|t| normalize_term(t)).filter(|t| !t.is_empty()));
        repo.topics_checked_at = Some(now_ts());
        Ok(())
    }

    async fn repos_missing_topics(&self, limit: usize) -> Result<Vec<String>> {
        let state = self.read()?;
        let mut repos: Vec<&Repo> = state
            .repos
            .values()
            .filter(|r| r.topics.is_empty() && r.topics_checked_at.is_none())
            .collect();
        repos.sort_by(|a, b| {
            b.last_seen_at
                .cmp(&a.last_seen_at)
                .then_with(|| a.full_name.cmp(&b.full_name))
        });
        Ok(repos
            .into_iter()
            .take(limit)
            .map(|r| r.full_name.clone())
            .collect())
    }

    async fn recent_repos(&self, limit: Option<usize>) -> Result<Vec<Repo>> {
        let state = self.read()?;
        let mut repos: Vec<Repo> = state.repos.values().cloned().collect();
        repos.sort_by(|a, b| {
            b.last_seen_at
                .cmp(&a.last_seen_at)
                .then_with(|| a.full_name.cmp(&b.full_name))
        });
        repos.truncate(limit.unwrap_or(usize::MAX));
        Ok(repos)
    }

    async fn get_repo(&self, full_name: &str) -> Result<Option<Repo>> {
        Ok(self.read()?.repos.get(full_name).cloned())
    }

    async fn hits_for_repo(&self, full_name: &str) -> Result<Vec<RepoHit>> {
        let state = self.read()?;
        Ok(state
            .hits
            .iter()
            .filter(|h| h.repo_full_name == full_name)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CandidateStore for InMemoryStore {
    async fn apply_contributions(&self, contributions: &[Contribution]) -> Result<ApplyReport> {
        let now = now_ts();
        let mut state = self.write()?;
        let mut report = ApplyReport::default();

        for c in contributions {
            let key = (c.term.clone(), c.repo_full_name.clone(), c.field);
            if !state.contribution_keys.insert(key) {
                report.skipped += 1;
                continue;
            }
            let candidate = state.candidates.entry(c.term.clone()).or_insert_with(|| {
                report.new_candidates += 1;
                KeywordCandidate {
                    term: c.term.clone(),
                    suggested_category: None,
                    score: 0.0,
                    occurrences: 0,
                    sources: Vec::new(),
                    status: CandidateStatus::Pending,
                    first_seen_at: now,
                    last_seen_at: now,
                }
            });
            candidate.score += c.score;
            candidate.occurrences += c.count;
            candidate.last_seen_at = now;
            candidate.sources.push(CandidateSource {
                repo_full_name: c.repo_full_name.clone(),
                field: c.field,
                count: c.count,
            });
            report.applied += 1;
        }

        Ok(report)
    }

    async fn candidates(
        &self,
        status: Option<CandidateStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<KeywordCandidate>> {
        let state = self.read()?;
        let mut out: Vec<KeywordCandidate> = state
            .candidates
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        out.sort_by(candidate_order);
        out.truncate(limit.unwrap_or(usize::MAX));
        Ok(out)
    }

    async fn get_candidate(&self, term: &str) -> Result<Option<KeywordCandidate>> {
        Ok(self.read()?.candidates.get(&normalize_term(term)).cloned())
    }

    async fn set_candidate_status(&self, term: &str, status: CandidateStatus) -> Result<bool> {
        let mut state = self.write()?;
        Ok(match state.candidates.get_mut(&normalize_term(term)) {
            Some(c) => {
                c.status = status;
                true
            }
            None => false,
        })
    }

    async fn suggest_category(&self, term: &str, category: &str) -> Result<()> {
        let mut state = self.write()?;
        if let Some(c) = state.candidates.get_mut(&normalize_term(term)) {
            c.suggested_category = Some(category.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        let mut t = Tags::new();
        for (c, v) in pairs {
            t.entry(c.to_string()).or_default().insert(v.to_string());
        }
        t
    }

    fn raw(name: &str) -> RawRepo {
        RawRepo {
            full_name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_is_idempotent() {
        let store = InMemoryStore::new();
        let kw = NewKeyword::new("domain", "PIC", 0.4, "manual");
        let first = store.upsert(&kw).await.unwrap();
        assert_eq!(first.change, UpsertChange::Created);
        assert_eq!(first.keyword.term, "pic");

        let again = NewKeyword::new("domain", "pic", 0.9, "auto");
        let second = store.upsert(&again).await.unwrap();
        assert_eq!(second.change, UpsertChange::Unchanged);
        assert_eq!(second.keyword.weight, 0.4);
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_reactivates_paused_keyword() {
        let store = InMemoryStore::new();
        store
            .upsert(&NewKeyword::new("method", "sph", 0.5, "seed"))
            .await
            .unwrap();
        let changed = store
            .set_status("sph", None, KeywordStatus::Paused)
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert!(store.list_active(Some("method")).await.unwrap().is_empty());

        let out = store
            .upsert(&NewKeyword::new("method", "sph", 0.7, "auto"))
            .await
            .unwrap();
        assert_eq!(out.change, UpsertChange::Reactivated);
        assert_eq!(out.keyword.weight, 0.7);
        assert_eq!(store.list_active(Some("method")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reserve_is_a_single_gate_per_canonical_string() {
        let store = InMemoryStore::new();
        let recipe = Recipe::default();
        let a = store.reserve("fea AND cfd", &recipe).await.unwrap();
        let b = store.reserve("  cfd   AND FEA ", &recipe).await.unwrap();
        assert!(!a.already_exists);
        assert!(b.already_exists);
        assert_eq!(a.query_id, b.query_id);
    }

    #[tokio::test]
    async fn concurrent_reserves_have_one_winner() {
        let store = Arc::new(InMemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .reserve("cfd AND solver", &Recipe::default())
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if !h.await.unwrap().already_exists {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn failure_keeps_query_pending() {
        let store = InMemoryStore::new();
        let r = store.reserve("cfd", &Recipe::default()).await.unwrap();
        store.record_failure(r.query_id, "throttled").await.unwrap();
        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("throttled"));

        store.mark_executed(r.query_id, Some(3)).await.unwrap();
        assert!(store.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tags_only_grow_and_hits_are_unique_per_query() {
        let store = InMemoryStore::new();
        let q1 = store.reserve("fea", &Recipe::default()).await.unwrap();
        let q2 = store.reserve("cfd", &Recipe::default()).await.unwrap();

        let first = store
            .record_hit(&raw("acme/x"), q1.query_id, &tags(&[("method", "fea")]))
            .await
            .unwrap();
        assert!(first.new_repo && first.new_hit);

        let retry = store
            .record_hit(&raw("acme/x"), q1.query_id, &tags(&[("method", "fea")]))
            .await
            .unwrap();
        assert!(!retry.new_repo && !retry.new_hit);

        store
            .record_hit(&raw("acme/x"), q2.query_id, &tags(&[("domain", "cfd")]))
            .await
            .unwrap();

        let repo = store.get_repo("acme/x").await.unwrap().unwrap();
        assert!(repo.merged_tags["method"].contains("fea"));
        assert!(repo.merged_tags["domain"].contains("cfd"));
        assert_eq!(store.hits_for_repo("acme/x").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn set_topics_marks_repo_checked() {
        let store = InMemoryStore::new();
        let q = store.reserve("fea", &Recipe::default()).await.unwrap();
        store
            .record_hit(&raw("acme/a"), q.query_id, &Tags::new())
            .await
            .unwrap();
        assert_eq!(store.repos_missing_topics(10).await.unwrap(), vec!["acme/a"]);

        store.set_topics("acme/a", &BTreeSet::new()).await.unwrap();
        assert!(store.repos_missing_topics(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn contributions_apply_once() {
        let store = InMemoryStore::new();
        let c = Contribution {
            term: "pic".into(),
            repo_full_name: "acme/x".into(),
            field: SourceField::Topic,
            count: 1,
            score: 1.0,
        };
        let first = store.apply_contributions(&[c.clone()]).await.unwrap();
        assert_eq!((first.applied, first.new_candidates), (1, 1));
        let second = store.apply_contributions(&[c]).await.unwrap();
        assert_eq!((second.applied, second.skipped), (0, 1));

        let cand = store.get_candidate("pic").await.unwrap().unwrap();
        assert_eq!(cand.score, 1.0);
        assert_eq!(cand.occurrences, 1);
    }
}
