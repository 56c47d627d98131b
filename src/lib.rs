//! # CAE Harvester
//!
//! A self-expanding, provenance-tracked discovery engine for engineering
//! simulation repositories on GitHub.
//!
//! A weighted keyword dictionary drives combinatorial search queries; every
//! query string is reserved once and never paid for twice; every repository
//! accumulates the tags of every query that found it; and new keywords are
//! mined from what was found and promoted back into the dictionary after
//! review.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ keywords │──▶│ QueryComposer│──▶│ QueryCache  │──▶│ SearchGateway│
//! └────▲─────┘   └──────────────┘   │  .reserve   │   │  (GitHub)    │
//!      │                            └─────────────┘   └──────┬───────┘
//!      │ promote                                              ▼
//! ┌────┴───────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ candidates │◀──│  extraction  │◀──│ RepoStore   │◀──│ record_hit   │
//! └────────────┘   └──────────────┘   │ (+ enrich)  │   └──────────────┘
//!                                     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! caeh init                         # create database, seed keywords
//! caeh harvest --steps 20           # compose and run 20 new queries
//! caeh enrich --limit 100           # backfill missing topics
//! caeh extract --top_n 50           # mine keyword candidates
//! caeh promote pic --category domain --weight 0.4
//! caeh export repos --out out/repos.csv
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation and keyword seeding |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`gateway`] | GitHub search and details client |
//! | [`harvest`] | The harvest loop |
//! | [`enrich`] | Topic backfill |
//! | [`extract`] | Candidate extraction command |
//! | [`promote`] | Batch promotion CSV input |
//! | [`export`] | CSV export |
//! | [`stats`] | Database overview |
//! | [`progress`] | Progress reporting on stderr |
//!
//! Domain logic (composer, sampler, scoring, promotion workflow, store
//! traits) lives in the `cae-harvester-core` crate.

pub mod config;
pub mod db;
pub mod enrich;
pub mod export;
pub mod extract;
pub mod gateway;
pub mod harvest;
pub mod migrate;
pub mod progress;
pub mod promote;
pub mod sqlite_store;
pub mod stats;
