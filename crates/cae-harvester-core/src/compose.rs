//! Query composition: weighted random recipes turned into novel query strings.
//!
//! A recipe starts from a *shape*, a weighted choice among category
//! combinations such as `domain+method+intent`. One keyword is drawn per
//! shape category, weighted by keyword weight. The terms are rendered into
//! the canonical query grammar and claimed through
//! [`QueryCache::reserve`](crate::store::QueryCache::reserve).
//!
//! # Collisions and widening
//!
//! A drawn string that this composer already produced, or that the cache
//! already holds, is a collision. Each width level allows
//! [`ComposerConfig::max_attempts`] draws; after that the composer widens:
//!
//! 1. add a keyword from a category the recipe does not use yet
//!    (categories weighted by their total keyword weight), then
//! 2. once every category is used, add a second keyword from a used
//!    category, sampled without replacement within it.
//!
//! Widening stops at [`ComposerConfig::max_terms`] or when no unused
//! keyword remains. When every level is exhausted the composer returns
//! [`ComposeError::CoverageExhausted`] so a finite keyword space can never
//! stall a harvest.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ComposeError;
use crate::models::{Keyword, KeywordStatus, Recipe, RecipeEntry};
use crate::query::build_query_string;
use crate::sampler::weighted_choice;
use crate::store::QueryCache;

/// A weighted combination of keyword categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeShape {
    pub categories: Vec<String>,
    pub weight: f64,
}

impl RecipeShape {
    pub fn new(categories: &[&str], weight: f64) -> Self {
        Self {
            categories: categories.iter().map(|c| c.to_string()).collect(),
            weight,
        }
    }

    pub fn name(&self) -> String {
        self.categories.join("+")
    }
}

/// Shapes biased toward short, solver-flavoured queries.
pub fn default_shapes() -> Vec<RecipeShape> {
    vec![
        RecipeShape::new(&["domain", "method", "intent"], 0.45),
        RecipeShape::new(&["domain", "intent"], 0.25),
        RecipeShape::new(&["method", "intent"], 0.15),
        RecipeShape::new(&["domain", "hpc", "intent"], 0.10),
        RecipeShape::new(&["domain", "method"], 0.05),
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposerConfig {
    pub shapes: Vec<RecipeShape>,
    /// Upper bound on keyword terms per query.
    pub max_terms: usize,
    /// Draws per width level before widening.
    pub max_attempts: usize,
    /// Search qualifiers appended to every query.
    pub qualifiers: Vec<String>,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            shapes: default_shapes(),
            max_terms: 5,
            max_attempts: 50,
            qualifiers: Vec::new(),
        }
    }
}

/// A freshly reserved query.
#[derive(Debug, Clone, PartialEq)]
pub struct Composed {
    pub query_id: i64,
    pub query: String,
    pub recipe: Recipe,
    /// Draws it took, including collisions.
    pub attempts: usize,
}

/// Active keywords grouped by category.
#[derive(Debug, Clone, Default)]
pub struct KeywordPool {
    by_category: BTreeMap<String, Vec<Keyword>>,
}

impl KeywordPool {
    /// Group a keyword snapshot. Paused keywords are ignored.
    pub fn new(keywords: &[Keyword]) -> Self {
        let mut by_category: BTreeMap<String, Vec<Keyword>> = BTreeMap::new();
        for kw in keywords.iter().filter(|k| k.status == KeywordStatus::Active) {
            by_category
                .entry(kw.category.clone())
                .or_default()
                .push(kw.clone());
        }
        Self { by_category }
    }

    pub fn is_empty(&self) -> bool {
        self.by_category.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }

    fn has(&self, category: &str) -> bool {
        self.by_category.contains_key(category)
    }

    fn category_weight(&self, category: &str) -> f64 {
        self.by_category
            .get(category)
            .map(|kws| kws.iter().map(|k| k.weight).sum())
            .unwrap_or(0.0)
    }
}

pub struct QueryComposer {
    config: ComposerConfig,
    rng: StdRng,
    /// Strings this composer has already drawn, to skip a cache round-trip.
    seen: HashSet<String>,
}

impl QueryComposer {
    pub fn new(config: ComposerConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            seen: HashSet::new(),
        }
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Draft one recipe at the given width level without touching the cache.
    ///
    /// `recipe.width` is the number of extra keywords actually added, which
    /// is lower than `width` when the pool cannot widen further.
    pub fn draft(&mut self, pool: &KeywordPool, width: usize) -> Option<Recipe> {
        if pool.is_empty() {
            return None;
        }
        let max_terms = self.config.max_terms.max(1);

        let applicable: Vec<&RecipeShape> = self
            .config
            .shapes
            .iter()
            .filter(|s| !s.categories.is_empty() && s.categories.iter().all(|c| pool.has(c)))
            .collect();

        let base: Vec<String> = if applicable.is_empty() {
            pool.by_category.keys().cloned().collect()
        } else {
            let weights: Vec<f64> = applicable.iter().map(|s| s.weight).collect();
            let idx = weighted_choice(&mut self.rng, &weights)?;
            applicable[idx].categories.clone()
        };
        let shape = base.join("+");

        let mut picked: Vec<&Keyword> = Vec::new();
        let mut used: BTreeSet<(String, i64)> = BTreeSet::new();
        for category in base.iter().take(max_terms) {
            if let Some(kw) = self.pick_in(pool, category, &used) {
                used.insert((kw.category.clone(), kw.id));
                picked.push(kw);
            }
        }

        let mut extra = 0;
        while extra < width && picked.len() < max_terms {
            let used_categories: BTreeSet<&str> =
                picked.iter().map(|k| k.category.as_str()).collect();
            let fresh: Vec<&String> = pool
                .by_category
                .keys()
                .filter(|c| !used_categories.contains(c.as_str()))
                .collect();

            let category = if !fresh.is_empty() {
                let weights: Vec<f64> = fresh.iter().map(|c| pool.category_weight(c)).collect();
                weighted_choice(&mut self.rng, &weights).map(|i| fresh[i].clone())
            } else {
                let open: Vec<(&String, f64)> = pool
                    .by_category
                    .iter()
                    .map(|(c, kws)| {
                        let remaining: f64 = kws
                            .iter()
                            .filter(|k| !used.contains(&(k.category.clone(), k.id)))
                            .map(|k| k.weight)
                            .sum();
                        (c, remaining)
                    })
                    .filter(|(_, w)| *w > 0.0)
                    .collect();
                let weights: Vec<f64> = open.iter().map(|(_, w)| *w).collect();
                weighted_choice(&mut self.rng, &weights).map(|i| open[i].0.clone())
            };

            let Some(category) = category else { break };
            match self.pick_in(pool, &category, &used) {
                Some(kw) => {
                    used.insert((kw.category.clone(), kw.id));
                    picked.push(kw);
                    extra += 1;
                }
                None => break,
            }
        }

        Some(Recipe {
            shape,
            width: extra,
            keywords: picked
                .into_iter()
                .map(|k| RecipeEntry {
                    keyword_id: Some(k.id),
                    category: k.category.clone(),
                    term: k.term.clone(),
                })
                .collect(),
            qualifiers: self.config.qualifiers.clone(),
        })
    }

    fn pick_in<'a>(
        &mut self,
        pool: &'a KeywordPool,
        category: &str,
        used: &BTreeSet<(String, i64)>,
    ) -> Option<&'a Keyword> {
        let remaining: Vec<&Keyword> = pool
            .by_category
            .get(category)?
            .iter()
            .filter(|k| !used.contains(&(k.category.clone(), k.id)))
            .collect();
        let weights: Vec<f64> = remaining.iter().map(|k| k.weight).collect();
        weighted_choice(&mut self.rng, &weights).map(|i| remaining[i])
    }

    /// Produce and reserve a query string never seen before.
    ///
    /// `keywords` should be a fresh snapshot of the active dictionary.
    /// Losing a reservation race to another composer counts as a collision
    /// and composition simply continues.
    pub async fn compose(
        &mut self,
        keywords: &[Keyword],
        cache: &dyn QueryCache,
    ) -> Result<Composed, ComposeError> {
        let pool = KeywordPool::new(keywords);
        if pool.is_empty() {
            return Err(ComposeError::NoKeywords);
        }

        let levels = self.config.max_terms.max(1).min(pool.len());
        let mut attempts = 0;

        for width in 0..levels {
            let mut reached = false;
            for _ in 0..self.config.max_attempts.max(1) {
                let Some(recipe) = self.draft(&pool, width) else {
                    return Err(ComposeError::NoKeywords);
                };
                attempts += 1;
                if recipe.width < width {
                    // This shape is capped; another shape may still widen.
                    continue;
                }
                reached = true;

                let query = build_query_string(&recipe.terms(), &recipe.qualifiers);
                if !self.seen.insert(query.clone()) {
                    continue;
                }
                let reservation = cache.reserve(&query, &recipe).await?;
                if reservation.already_exists {
                    continue;
                }

                return Ok(Composed {
                    query_id: reservation.query_id,
                    query,
                    recipe,
                    attempts,
                });
            }
            if !reached {
                // No shape grows this wide, so no wider level can either.
                debug!(width, attempts, "composer cannot widen further");
                return Err(ComposeError::CoverageExhausted { attempts });
            }
            debug!(width, attempts, "width level exhausted, widening");
        }

        Err(ComposeError::CoverageExhausted { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewKeyword;
    use crate::store::memory::InMemoryStore;
    use crate::store::KeywordSource;

    fn kw(id: i64, category: &str, term: &str, weight: f64) -> Keyword {
        Keyword {
            id,
            category: category.into(),
            term: term.into(),
            weight,
            status: KeywordStatus::Active,
            source: "test".into(),
        }
    }

    fn dictionary() -> Vec<Keyword> {
        vec![
            kw(1, "domain", "cfd", 1.0),
            kw(2, "domain", "thermal", 0.8),
            kw(3, "method", "fem", 1.0),
            kw(4, "method", "fvm", 0.7),
            kw(5, "intent", "solver", 1.0),
            kw(6, "intent", "simulation", 1.0),
            kw(7, "hpc", "mpi", 0.7),
        ]
    }

    #[tokio::test]
    async fn two_keyword_dictionary_yields_one_query_with_both_terms() {
        let store = InMemoryStore::new();
        store
            .upsert(&NewKeyword::new("domain", "fea", 1.0, "seed"))
            .await
            .unwrap();
        store
            .upsert(&NewKeyword::new("method", "finite-element", 1.0, "seed"))
            .await
            .unwrap();
        let keywords = store.list_active(None).await.unwrap();

        let mut composer = QueryComposer::new(ComposerConfig::default(), 42);
        let composed = composer.compose(&keywords, &store).await.unwrap();
        assert_eq!(composed.query, "fea AND finite-element");
        assert_eq!(composed.recipe.shape, "domain+method");
        assert_eq!(composed.recipe.terms().len(), 2);

        let next = composer.compose(&keywords, &store).await;
        assert!(matches!(next, Err(ComposeError::CoverageExhausted { .. })));
    }

    #[tokio::test]
    async fn composed_queries_are_never_repeated() {
        let store = InMemoryStore::new();
        let keywords = dictionary();
        let mut composer = QueryComposer::new(ComposerConfig::default(), 7);
        let mut seen = HashSet::new();
        loop {
            match composer.compose(&keywords, &store).await {
                Ok(c) => assert!(seen.insert(c.query.clone()), "repeat: {}", c.query),
                Err(ComposeError::CoverageExhausted { .. }) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert!(seen.len() < 500, "composer never exhausted");
        }
        assert!(seen.len() > 8);
    }

    #[tokio::test]
    async fn separate_composers_sharing_a_cache_do_not_collide() {
        let store = InMemoryStore::new();
        let keywords = dictionary();
        let mut a = QueryComposer::new(ComposerConfig::default(), 1);
        let mut b = QueryComposer::new(ComposerConfig::default(), 1);
        let mut ids = HashSet::new();
        for _ in 0..5 {
            let x = a.compose(&keywords, &store).await.unwrap();
            let y = b.compose(&keywords, &store).await.unwrap();
            assert_ne!(x.query, y.query);
            assert!(ids.insert(x.query_id));
            assert!(ids.insert(y.query_id));
        }
    }

    #[tokio::test]
    async fn capped_shape_does_not_hide_a_shape_that_can_still_widen() {
        let store = InMemoryStore::new();
        let keywords = vec![
            kw(1, "a", "a1", 1.0),
            kw(2, "b", "b1", 1.0),
            kw(3, "c", "c1", 1.0),
            kw(4, "d", "d1", 1.0),
            kw(5, "d", "d2", 1.0),
            kw(6, "d", "d3", 1.0),
        ];
        let config = ComposerConfig {
            shapes: vec![
                RecipeShape::new(&["a", "b", "c"], 1.0),
                RecipeShape::new(&["a"], 1.0),
            ],
            max_terms: 3,
            max_attempts: 200,
            qualifiers: Vec::new(),
        };
        let mut composer = QueryComposer::new(config, 42);
        let mut seen = HashSet::new();
        loop {
            match composer.compose(&keywords, &store).await {
                Ok(c) => assert!(seen.insert(c.query)),
                Err(ComposeError::CoverageExhausted { .. }) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert!(seen.len() < 200, "composer never exhausted");
        }
        for query in [
            "a1 AND b1 AND c1",
            "a1",
            "a1 AND b1",
            "a1 AND c1",
            "a1 AND d1",
            "a1 AND d2",
            "a1 AND d3",
        ] {
            assert!(seen.contains(query), "never produced {query}: {seen:?}");
        }
    }

    #[test]
    fn same_seed_same_drafts() {
        let pool = KeywordPool::new(&dictionary());
        let mut a = QueryComposer::new(ComposerConfig::default(), 99);
        let mut b = QueryComposer::new(ComposerConfig::default(), 99);
        for width in 0..3 {
            assert_eq!(a.draft(&pool, width), b.draft(&pool, width));
        }
    }

    #[test]
    fn widening_adds_new_categories_first() {
        let pool = KeywordPool::new(&dictionary());
        let config = ComposerConfig {
            shapes: vec![RecipeShape::new(&["domain", "intent"], 1.0)],
            ..Default::default()
        };
        let mut composer = QueryComposer::new(config, 3);
        let recipe = composer.draft(&pool, 2).unwrap();
        assert_eq!(recipe.width, 2);
        let categories: BTreeSet<&str> =
            recipe.keywords.iter().map(|k| k.category.as_str()).collect();
        assert_eq!(categories.len(), 4);
    }

    #[test]
    fn max_terms_caps_widening() {
        let pool = KeywordPool::new(&dictionary());
        let config = ComposerConfig {
            max_terms: 3,
            ..Default::default()
        };
        let mut composer = QueryComposer::new(config, 11);
        for _ in 0..20 {
            let recipe = composer.draft(&pool, 6).unwrap();
            assert!(recipe.keywords.len() <= 3);
        }
    }

    #[test]
    fn shapes_without_keywords_fall_back_to_all_categories() {
        let pool = KeywordPool::new(&[kw(1, "physics", "plasma", 1.0), kw(2, "code", "pic", 1.0)]);
        let mut composer = QueryComposer::new(ComposerConfig::default(), 5);
        let recipe = composer.draft(&pool, 0).unwrap();
        assert_eq!(recipe.shape, "code+physics");
        assert_eq!(recipe.keywords.len(), 2);
    }

    #[tokio::test]
    async fn empty_dictionary_is_reported() {
        let store = InMemoryStore::new();
        let mut composer = QueryComposer::new(ComposerConfig::default(), 5);
        assert!(matches!(
            composer.compose(&[], &store).await,
            Err(ComposeError::NoKeywords)
        ));
    }

    #[tokio::test]
    async fn qualifiers_are_part_of_the_query() {
        let store = InMemoryStore::new();
        let config = ComposerConfig {
            qualifiers: vec!["stars:>=1".into()],
            ..Default::default()
        };
        let mut composer = QueryComposer::new(config, 5);
        let composed = composer.compose(&dictionary(), &store).await.unwrap();
        assert!(composed.query.ends_with(" stars:>=1"));
        assert_eq!(composed.recipe.qualifiers, vec!["stars:>=1"]);
    }
}
