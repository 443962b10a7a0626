//! # UniQA
//!
//! Retrieval-augmented question answering over institutional documents and
//! curated answers in Uzbek, Russian and English.
//!
//! The pure retrieval engine lives in [`uniqa_core`]. This crate supplies the
//! storage, providers and wiring around it.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ Documents  │──▶│ Chunk+Embed  │──▶│ SQLite           │
//! │ Curated QA │   │  (ingest)    │   │ FTS5 + vectors   │
//! └────────────┘   └──────────────┘   └────────┬─────────┘
//!                                              │
//!        ┌──────────────┐   ┌──────────────────┤
//!        │ Facts, cache │──▶│ Self-correcting  │
//!        └──────────────┘   │ retrieval        │
//!                           └────────┬─────────┘
//!                                    ▼
//!                  generate ─▶ grounding ─▶ hierarchy
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Documents, curated answers, facts, cache rows |
//! | [`sqlite_index`] | SQLite lexical and vector indexes |
//! | [`embedding`] | Embedding providers (Ollama, OpenAI, fastembed) |
//! | [`generate`] | Answer generation through Ollama |
//! | [`ingest`] | Document processing and curated sync |
//! | [`answer`] | The end-to-end answer pipeline |
//! | [`app`] | Wiring everything from a [`config::Config`] |

pub mod answer;
pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generate;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod sqlite_index;
pub mod store;

pub use app::Uniqa;
pub use uniqa_core;
