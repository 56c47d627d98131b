//! Topic backfill for repositories whose search payload carried none.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use cae_harvester_core::store::RepoStore;

use crate::gateway::DetailsEnricher;
use crate::progress::{HarvestProgressEvent, HarvestProgressReporter};

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct EnrichSummary {
    pub targeted: usize,
    pub enriched: usize,
    /// Checked repos whose details had no topics either.
    pub still_empty: usize,
    pub failed: usize,
}

/// Fetch details for up to `limit` repos missing topics, most recently
/// seen first, and union the returned topics into the registry.
///
/// A failed fetch is logged and counted; the repo stays unchecked so a later
/// run retries it.
pub async fn run_enrich(
    store: &dyn RepoStore,
    enricher: &dyn DetailsEnricher,
    limit: usize,
    reporter: &dyn HarvestProgressReporter,
) -> Result<EnrichSummary> {
    let targets = store.repos_missing_topics(limit).await?;
    let mut summary = EnrichSummary {
        targeted: targets.len(),
        ..Default::default()
    };
    info!(targets = targets.len(), "enrichment started");

    for (i, full_name) in targets.iter().enumerate() {
        match enricher.fetch_details(full_name).await {
            Ok(details) => {
                let topics = details.normalized_topics();
                if topics.is_empty() {
                    summary.still_empty += 1;
                } else {
                    summary.enriched += 1;
                }
                store.set_topics(full_name, &topics).await?;
            }
            Err(e) => {
                warn!(repo = %full_name, error = %e, "details fetch failed");
                summary.failed += 1;
            }
        }
        reporter.report(HarvestProgressEvent::Enriching {
            n: (i + 1) as u64,
            total: targets.len() as u64,
        });
    }

    info!(
        enriched = summary.enriched,
        still_empty = summary.still_empty,
        failed = summary.failed,
        "enrichment finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use cae_harvester_core::models::{RawRepo, Tags};
    use cae_harvester_core::store::memory::InMemoryStore;

    use crate::gateway::GatewayError;
    use crate::progress::NoProgress;

    struct FakeDetails(HashMap<String, Vec<String>>);

    #[async_trait]
    impl DetailsEnricher for FakeDetails {
        async fn fetch_details(&self, full_name: &str) -> Result<RawRepo, GatewayError> {
            match self.0.get(full_name) {
                Some(topics) => Ok(RawRepo {
                    full_name: full_name.into(),
                    topics: Some(topics.clone()),
                    ..Default::default()
                }),
                None => Err(GatewayError::Http {
                    status: 404,
                    body: "Not Found".into(),
                }),
            }
        }
    }

    async fn seen(store: &InMemoryStore, names: &[&str]) {
        use cae_harvester_core::models::Recipe;
        use cae_harvester_core::store::QueryCache;
        let q = store.reserve("fea", &Recipe::default()).await.unwrap();
        for name in names {
            let raw = RawRepo {
                full_name: name.to_string(),
                ..Default::default()
            };
            store.record_hit(&raw, q.query_id, &Tags::new()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn backfills_topics_and_counts_failures() {
        let store = InMemoryStore::new();
        seen(&store, &["o/a", "o/b", "o/gone"]).await;
        let fake = FakeDetails(HashMap::from([
            ("o/a".to_string(), vec!["CFD".to_string(), "openfoam".to_string()]),
            ("o/b".to_string(), vec![]),
        ]));

        let summary = run_enrich(&store, &fake, 10, &NoProgress).await.unwrap();
        assert_eq!(summary.targeted, 3);
        assert_eq!(summary.enriched, 1);
        assert_eq!(summary.still_empty, 1);
        assert_eq!(summary.failed, 1);

        let a = store.get_repo("o/a").await.unwrap().unwrap();
        assert!(a.topics.contains("cfd"));
        // Only the failed fetch is retried next time.
        assert_eq!(store.repos_missing_topics(10).await.unwrap(), vec!["o/gone"]);
    }
}
