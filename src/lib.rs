//! # Repopulse
//!
//! Turns raw GitHub repository activity (merged pull requests, releases)
//! into a deduplicated index of semantically coherent "Update" records,
//! each classified by category and significance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────┐   ┌──────────┐
//! │ ChangeSource │──▶│ Grouping → Summaries   │──▶│  SQLite   │
//! │ (GitHub API) │   │ Release clustering     │   │ updates/  │
//! └──────────────┘   └──────────┬────────────┘   │ releases  │
//!                               │                 └────┬─────┘
//!                        ┌──────┴──────┐               │
//!                        │ Classifier  │          ┌────┴─────┐
//!                        │ (LLM, JSON) │          │   CLI    │
//!                        └─────────────┘          │ (pulse)  │
//!                                                 └──────────┘
//! ```
//!
//! The Coordinator is the entry point for every trigger path: tracking a
//! repository, staleness-driven refresh, forced destructive refresh,
//! backward pagination, and the periodic sweep. Idempotency rests on the
//! persistence layer's uniqueness constraints — PR numbers and group
//! hashes per repository — not on in-memory locking.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`source`] | Change source trait + GitHub client |
//! | [`classifier`] | Classification service trait + OpenAI client |
//! | [`grouping`] | Two-phase semantic grouping engine |
//! | [`summarize`] | Group summarization with fallback |
//! | [`releases`] | Heuristic release clustering |
//! | [`persist`] | Hash-keyed dedup and persistence |
//! | [`ingest`] | One ingestion run, end to end |
//! | [`coordinator`] | Staleness state machine and trigger paths |
//! | [`feed`] | Read side for the CLI |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod feed;
pub mod grouping;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod persist;
pub mod releases;
pub mod source;
pub mod summarize;
