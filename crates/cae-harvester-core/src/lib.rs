//! # CAE Harvester Core
//!
//! Runtime-agnostic logic for the CAE repository harvester: data models,
//! the weighted sampler, the query composer, candidate keyword scoring,
//! the promotion workflow, and the store traits that every backend
//! implements.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem code. The
//! SQLite-backed stores and the GitHub gateway live in the `cae-harvester`
//! crate; [`store::memory`] provides in-memory stores with the same
//! contracts for tests and embedding.
//!
//! ## Feedback loop
//!
//! ```text
//! KeywordSource ──▶ QueryComposer ──▶ QueryCache.reserve ──▶ (gateway)
//!       ▲                                                       │
//!       │                                                       ▼
//!  promotion ◀── CandidateStore ◀── candidate scoring ◀── RepoStore.record_hit
//! ```

pub mod compose;
pub mod error;
pub mod extract;
pub mod models;
pub mod promote;
pub mod query;
pub mod sampler;
pub mod seed;
pub mod store;

pub use error::{ComposeError, QualifierError, WorkflowError};
