use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use cae_harvester::config::Config;
use cae_harvester::gateway::{has_more, GatewayError, SearchGateway, SearchPage};
use cae_harvester::harvest::{run_harvest, HarvestOptions};
use cae_harvester::progress::NoProgress;
use cae_harvester::sqlite_store::SqliteStore;
use cae_harvester_core::compose::ComposerConfig;
use cae_harvester_core::models::{NewKeyword, RawRepo};
use cae_harvester_core::store::{KeywordSource, QueryCache, RepoStore};

/// Serves `total` synthetic repos, sliced into pages, for any query.
struct FakeGateway {
    repos: Vec<RawRepo>,
    failing: AtomicBool,
    calls: AtomicUsize,
    queries: Mutex<Vec<(String, u32)>>,
}

impl FakeGateway {
    fn new(names: &[&str]) -> Self {
        Self {
            repos: names
                .iter()
                .map(|n| RawRepo {
                    full_name: n.to_string(),
                    html_url: Some(format!("https://github.com/{}", n)),
                    stars: Some(5),
                    ..Default::default()
                })
                .collect(),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SearchGateway for FakeGateway {
    async fn search(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push((query.to_string(), page));
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Http {
                status: 502,
                body: "Bad Gateway".into(),
            });
        }
        let start = ((page - 1) * per_page) as usize;
        let items: Vec<RawRepo> = self
            .repos
            .iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect();
        let total = self.repos.len() as i64;
        Ok(SearchPage {
            has_more: has_more(page, per_page, items.len(), total),
            total_count: total,
            items,
        })
    }
}

async fn open_store(tmp: &TempDir) -> Arc<SqliteStore> {
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("harvest.sqlite");
    Arc::new(SqliteStore::open(&config).await.unwrap())
}

async fn add(store: &SqliteStore, category: &str, term: &str) {
    store
        .upsert(&NewKeyword::new(category, term, 1.0, "test"))
        .await
        .unwrap();
}

fn options(steps: usize) -> HarvestOptions {
    HarvestOptions {
        steps,
        per_page: 50,
        pages_per_query: 1,
        seed: 42,
        workers: 1,
        composer: ComposerConfig {
            qualifiers: Vec::new(),
            ..ComposerConfig::default()
        },
    }
}

async fn query_count(store: &SqliteStore) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM queries")
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn one_step_attributes_recipe_tags_to_the_discovered_repo() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    add(&store, "domain", "fea").await;
    add(&store, "method", "finite-element").await;
    let gateway = Arc::new(FakeGateway::new(&["acme/fea-solver"]));

    let summary = run_harvest(
        Arc::clone(&store),
        gateway.clone(),
        &options(1),
        Arc::new(NoProgress),
    )
    .await
    .unwrap();

    assert_eq!(summary.steps, 1);
    assert_eq!(summary.executed, 1);
    assert_eq!(summary.new_repos, 1);
    assert_eq!(summary.hits, 1);
    assert!(!summary.run_id.is_empty());
    assert_eq!(query_count(&store).await, 1);

    let repo = store.get_repo("acme/fea-solver").await.unwrap().unwrap();
    assert!(repo.merged_tags["domain"].contains("fea"));
    assert!(repo.merged_tags["method"].contains("finite-element"));

    let hits = store.hits_for_repo("acme/fea-solver").await.unwrap();
    assert_eq!(hits.len(), 1);
    let query = store.get_query(hits[0].query_id).await.unwrap().unwrap();
    assert_eq!(query.query, "fea AND finite-element");
    assert!(!query.is_pending());
    assert_eq!(query.recipe.terms().len(), 2);
}

#[tokio::test]
async fn rerun_on_exhausted_space_adds_no_queries() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    add(&store, "domain", "fea").await;
    add(&store, "method", "finite-element").await;
    let gateway = Arc::new(FakeGateway::new(&["acme/fea-solver"]));

    run_harvest(Arc::clone(&store), gateway.clone(), &options(1), Arc::new(NoProgress))
        .await
        .unwrap();
    let again = run_harvest(Arc::clone(&store), gateway.clone(), &options(5), Arc::new(NoProgress))
        .await
        .unwrap();

    assert!(again.exhausted);
    assert_eq!(again.steps, 0);
    assert_eq!(query_count(&store).await, 1);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.hits_for_repo("acme/fea-solver").await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_query_stays_pending_and_is_retried_first() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    add(&store, "domain", "fea").await;
    add(&store, "method", "finite-element").await;
    let gateway = Arc::new(FakeGateway::new(&["acme/fea-solver"]));
    gateway.failing.store(true, Ordering::SeqCst);

    let failed = run_harvest(Arc::clone(&store), gateway.clone(), &options(1), Arc::new(NoProgress))
        .await
        .unwrap();
    assert_eq!(failed.steps, 1);
    assert_eq!(failed.failed, 1);
    let pending = store.pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].last_error.as_deref().unwrap().contains("502"));

    gateway.failing.store(false, Ordering::SeqCst);
    let resumed = run_harvest(Arc::clone(&store), gateway.clone(), &options(1), Arc::new(NoProgress))
        .await
        .unwrap();
    assert_eq!(resumed.resumed, 1);
    assert_eq!(resumed.executed, 1);
    assert_eq!(resumed.hits, 1);
    assert!(store.pending(10).await.unwrap().is_empty());
    assert_eq!(query_count(&store).await, 1);

    let query = store.get_query(pending[0].id).await.unwrap().unwrap();
    assert_eq!(query.attempts, 2);
    assert!(query.last_error.is_none());
}

#[tokio::test]
async fn pages_follow_has_more_up_to_the_configured_depth() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    add(&store, "domain", "cfd").await;
    add(&store, "method", "fvm").await;
    let names: Vec<String> = (0..5).map(|i| format!("org/r{}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let gateway = Arc::new(FakeGateway::new(&refs));

    let mut opts = options(1);
    opts.per_page = 2;
    opts.pages_per_query = 10;
    let summary = run_harvest(Arc::clone(&store), gateway.clone(), &opts, Arc::new(NoProgress))
        .await
        .unwrap();

    // 2 + 2 + 1: the short third page ends pagination.
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
    assert_eq!(summary.hits, 5);
    assert_eq!(summary.new_repos, 5);

    let pages: Vec<u32> = gateway.queries.lock().unwrap().iter().map(|(_, p)| *p).collect();
    assert_eq!(pages, vec![1, 2, 3]);
}

#[tokio::test]
async fn concurrent_workers_never_share_a_query() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    for term in ["cfd", "fea", "em", "acoustics", "combustion"] {
        add(&store, "domain", term).await;
    }
    for term in ["fvm", "fem", "sph", "lbm"] {
        add(&store, "method", term).await;
    }
    for term in ["solver", "toolkit"] {
        add(&store, "intent", term).await;
    }
    let gateway = Arc::new(FakeGateway::new(&["org/shared"]));

    let mut opts = options(12);
    opts.workers = 4;
    let summary = run_harvest(Arc::clone(&store), gateway.clone(), &opts, Arc::new(NoProgress))
        .await
        .unwrap();

    assert_eq!(summary.steps, 12);
    assert_eq!(summary.executed, 12);
    assert_eq!(query_count(&store).await, 12);
    assert_eq!(summary.new_repos, 1);
    assert_eq!(summary.hits, 12);

    let mut seen: Vec<String> = gateway
        .queries
        .lock()
        .unwrap()
        .iter()
        .map(|(q, _)| q.clone())
        .collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 12);
    assert_eq!(store.hits_for_repo("org/shared").await.unwrap().len(), 12);
}

/// First call answers at once; every later call stalls before answering empty.
struct StallingGateway {
    calls: AtomicUsize,
}

#[async_trait]
impl SearchGateway for StallingGateway {
    async fn search(
        &self,
        _query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, GatewayError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(SearchPage {
                total_count: 1,
                items: vec![RawRepo {
                    full_name: "org/breaks-store".into(),
                    ..Default::default()
                }],
                has_more: has_more(page, per_page, 1, 1),
            });
        }
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        Ok(SearchPage {
            total_count: 0,
            items: Vec::new(),
            has_more: false,
        })
    }
}

#[tokio::test]
async fn store_error_in_one_worker_stops_the_others() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    for term in ["cfd", "fea", "em", "acoustics"] {
        add(&store, "domain", term).await;
    }
    for term in ["fvm", "fem", "sph"] {
        add(&store, "method", term).await;
    }
    sqlx::query("DROP TABLE repo_hits")
        .execute(store.pool())
        .await
        .unwrap();
    let gateway = Arc::new(StallingGateway {
        calls: AtomicUsize::new(0),
    });

    let mut opts = options(20);
    opts.workers = 2;
    let result = run_harvest(Arc::clone(&store), gateway.clone(), &opts, Arc::new(NoProgress)).await;
    assert!(result.is_err());

    let reserved = query_count(&store).await;
    tokio::time::sleep(std::time::Duration::from_millis(800)).await;
    assert_eq!(query_count(&store).await, reserved);
    assert!(gateway.calls.load(Ordering::SeqCst) <= 2);
}
