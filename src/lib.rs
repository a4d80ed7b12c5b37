//! Semantic retrieval over bilingual alignment records.
//!
//! The crate turns a JSONL file of aligned text pairs into a searchable
//! vector index: records are embedded with a sentence-embedding model,
//! stored in an exact or partitioned index, and persisted as a
//! three-artifact directory that a [`query::QueryEngine`] can reopen and
//! serve nearest-neighbor queries from.
//!
//! Typical flow:
//!
//! ```no_run
//! use alignsearch::builder::IndexBuilder;
//! use alignsearch::config::IndexConfig;
//! use alignsearch::embedding::FastEmbedEmbedder;
//! use alignsearch::config::IndexManifest;
//! use alignsearch::loader::RecordReader;
//! use alignsearch::{persistence, query::QueryEngine};
//! use std::path::Path;
//!
//! # fn main() -> alignsearch::error::RetrievalResult<()> {
//! let config = IndexConfig::default();
//! let embedder = FastEmbedEmbedder::new(&config.model)?;
//! let reader = RecordReader::open(Path::new("alignments.jsonl"), config.text_field)?;
//! let (index, metadata, stats) = IndexBuilder::new(&config, &embedder)?.build(reader)?;
//! let manifest = IndexManifest::new(&config, stats.dimension, stats.records_indexed);
//! persistence::save(&index, &metadata, &manifest, &config.output_dir)?;
//!
//! let engine = QueryEngine::open(&config.output_dir)?;
//! let results = engine.query("a sentence to search for", Some(5))?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod loader;
pub mod metadata;
pub mod persistence;
pub mod query;
pub mod types;

pub use error::{RetrievalError, RetrievalResult};
pub use types::{AlignmentRecord, ScoredResult, VectorId};
