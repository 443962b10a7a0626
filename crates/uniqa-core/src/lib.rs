//! # UniQA Core
//!
//! Retrieval and self-correction engine for institutional Q&A: document
//! chunking, the dual lexical/vector index contract, hybrid retrieval,
//! relevance grading, the bounded refinement loop, grounding checks, source
//! hierarchy resolution, dynamic facts and the answer cache front.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O. Storage,
//! embedding and generation backends are plugged in through traits by the
//! `uniqa` crate.

pub mod cache;
pub mod chunk;
pub mod correction;
pub mod embedding;
pub mod error;
pub mod facts;
pub mod grade;
pub mod grounding;
pub mod hierarchy;
pub mod index;
pub mod intent;
pub mod lexical;
pub mod models;
pub mod retrieve;
pub mod sections;
pub mod split;

pub use error::{EmbeddingError, RagError, Result};
