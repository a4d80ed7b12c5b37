//! Error types for the retrieval system.
//!
//! Every fatal error falls into one of five categories (input, config,
//! resource, collaborator, corruption) so callers can decide between
//! retrying, fixing their configuration, or rebuilding the index.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for index build, persistence, and query operations.
///
/// Error messages include actionable suggestions where one exists.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// A single record could not be used. Recoverable: the loader logs it
    /// and skips the line without shifting vector ids.
    #[error("Skipping record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error(
        "Failed to read input '{path}': {source}\nSuggestion: check that the file exists and you have read permissions"
    )]
    SourceUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(
        "No texts to index in '{path}'\nSuggestion: check that the file contains alignment records with the configured text field"
    )]
    EmptyCorpus { path: PathBuf },

    #[error(
        "Index artifact not found: {path}\nSuggestion: rebuild the index or point to the correct index directory"
    )]
    ArtifactMissing { path: PathBuf },

    #[error(
        "Failed to write index artifact '{path}': {source}\nSuggestion: check disk space and directory permissions"
    )]
    ArtifactWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(
        "Embedding model error: {0}\nSuggestion: verify the model name and that the model can be downloaded on first use"
    )]
    Embedding(String),

    #[error("Rerank scorer error: {0}")]
    Scorer(String),

    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index corrupted: {reason}\nSuggestion: rebuild the index from the alignment file")]
    Corrupted { reason: String },

    #[error(
        "Unsupported index format version: expected {expected}, got {actual}\nSuggestion: rebuild the index with this version of alignsearch"
    )]
    VersionMismatch { expected: u32, actual: u32 },
}

impl RetrievalError {
    /// Stable category code for programmatic handling.
    ///
    /// One of `INPUT`, `CONFIG`, `RESOURCE`, `COLLABORATOR`, `CORRUPTION`.
    pub fn category(&self) -> &'static str {
        match self {
            Self::MalformedRecord { .. } => "INPUT",
            Self::Config { .. } | Self::EmptyCorpus { .. } => "CONFIG",
            Self::SourceUnreadable { .. }
            | Self::ArtifactMissing { .. }
            | Self::ArtifactWrite { .. } => "RESOURCE",
            Self::Embedding(_) | Self::Scorer(_) | Self::DimensionMismatch { .. } => "COLLABORATOR",
            Self::Corrupted { .. } | Self::VersionMismatch { .. } => "CORRUPTION",
        }
    }
}

/// Result type alias for retrieval operations.
pub type RetrievalResult<T> = Result<T, RetrievalError>;
