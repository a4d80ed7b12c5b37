//! Configuration for index building and querying.
//!
//! Both configs are created once, validated eagerly, and never mutated after
//! a build or query session starts. The persisted [`IndexManifest`] carries
//! the build-time parameters that query time must reuse (model name and the
//! normalization flag in particular), so a query can never silently run with
//! mismatched settings.

use crate::error::{RetrievalError, RetrievalResult};
use crate::types::AlignmentRecord;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Vector index construction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexKind {
    /// Exact inner-product search. Pair with normalized embeddings for
    /// cosine similarity.
    FlatIp,
    /// Exact L2 search. Scores are negative distances.
    FlatL2,
    /// Approximate search over `nlist` clusters, probing `nprobe` of them.
    /// Requires a training phase before any vector can be added.
    IvfFlat,
}

impl IndexKind {
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        matches!(self, Self::IvfFlat)
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::FlatIp => "flat-ip",
            Self::FlatL2 => "flat-l2",
            Self::IvfFlat => "ivf-flat",
        };
        write!(f, "{name}")
    }
}

/// Device hint for the embedding model.
///
/// The ONNX runtime picks the actual execution provider; this hint is
/// recorded and logged so build reports stay meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Device {
    Accelerator,
    Cpu,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Accelerator => "accelerator",
            Self::Cpu => "cpu",
        };
        write!(f, "{name}")
    }
}

/// Which side of an alignment record gets embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    SrcText,
    TgtText,
}

impl TextField {
    /// The designated text of a record.
    #[must_use]
    pub fn of<'a>(&self, record: &'a AlignmentRecord) -> &'a str {
        match self {
            Self::SrcText => &record.src_text,
            Self::TgtText => &record.tgt_text,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SrcText => "src_text",
            Self::TgtText => "tgt_text",
        }
    }
}

/// Default multilingual sentence embedding model.
pub const DEFAULT_MODEL: &str = "paraphrase-multilingual-MiniLM-L12-v2";

/// Immutable build parameters for one index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Embedding model identifier, see `embedding::parse_embedding_model`.
    pub model: String,
    pub device: Device,
    /// Embedding batch size. Batching is a throughput knob only; it never
    /// changes output order or values.
    pub batch_size: usize,
    /// Scale each embedding to unit L2 norm before indexing. Required for
    /// inner-product search to approximate cosine similarity.
    pub normalize_embeddings: bool,
    pub index_kind: IndexKind,
    /// Cluster count for the partitioned index. Training needs at least
    /// `nlist` vectors; an order of magnitude more is recommended.
    pub nlist: usize,
    /// Clusters visited per search for the partitioned index.
    pub nprobe: usize,
    pub text_field: TextField,
    pub output_dir: PathBuf,
    pub show_progress: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            device: Device::Accelerator,
            batch_size: 32,
            normalize_embeddings: true,
            index_kind: IndexKind::FlatIp,
            nlist: 100,
            nprobe: 10,
            text_field: TextField::SrcText,
            output_dir: PathBuf::from("data/indices"),
            show_progress: true,
        }
    }
}

impl IndexConfig {
    /// Validate before any work is performed.
    ///
    /// The `nlist <= vector count` check can only happen once the corpus
    /// size is known; the partitioned index enforces it at training time.
    pub fn validate(&self) -> RetrievalResult<()> {
        if self.model.trim().is_empty() {
            return Err(RetrievalError::Config {
                reason: "embedding model name must not be empty".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(RetrievalError::Config {
                reason: "batch_size must be at least 1".to_string(),
            });
        }
        if self.index_kind.is_partitioned() {
            if self.nlist == 0 {
                return Err(RetrievalError::Config {
                    reason: "nlist must be at least 1 for a partitioned index".to_string(),
                });
            }
            if self.nprobe == 0 || self.nprobe > self.nlist {
                return Err(RetrievalError::Config {
                    reason: format!(
                        "nprobe must be between 1 and nlist ({}), got {}",
                        self.nlist, self.nprobe
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Immutable query-time parameters.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    /// Hard cap on candidates fetched per query.
    pub max_top_k: usize,
    /// Candidates scoring below this are dropped.
    pub similarity_threshold: f32,
    pub enable_reranking: bool,
    /// Coarse candidates handed to the scorer.
    pub rerank_top_k: usize,
    /// Final result count after reranking.
    pub rerank_top_n: usize,
    pub enable_metadata_filter: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            max_top_k: 100,
            similarity_threshold: 0.0,
            enable_reranking: false,
            rerank_top_k: 20,
            rerank_top_n: 5,
            enable_metadata_filter: true,
        }
    }
}

/// Persisted build parameters, written next to the index artifacts.
///
/// Loaded together with the index and metadata, never independently, so the
/// query path always embeds with the same model and normalization as the
/// build did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub model_name: String,
    pub index_type: IndexKind,
    pub embedding_dim: usize,
    pub normalize_embeddings: bool,
    pub num_vectors: usize,
    pub text_field: TextField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlist: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nprobe: Option<usize>,
}

impl IndexManifest {
    /// Current manifest format version.
    pub const CURRENT_VERSION: u32 = 1;

    /// Build a manifest from the config used for a completed build.
    #[must_use]
    pub fn new(config: &IndexConfig, embedding_dim: usize, num_vectors: usize) -> Self {
        let partitioned = config.index_kind.is_partitioned();
        Self {
            version: Self::CURRENT_VERSION,
            model_name: config.model.clone(),
            index_type: config.index_kind,
            embedding_dim,
            normalize_embeddings: config.normalize_embeddings,
            num_vectors,
            text_field: config.text_field,
            nlist: partitioned.then_some(config.nlist),
            nprobe: partitioned.then_some(config.nprobe),
        }
    }
}
