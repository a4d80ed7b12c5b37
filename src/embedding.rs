//! Embedding generation for alignment texts.
//!
//! The [`Embedder`] trait is the seam between the index and the embedding
//! model: the builder and query engine only ever see a batch-in,
//! vectors-out capability. The shipped implementation wraps fastembed.

use crate::config::Device;
use crate::error::{RetrievalError, RetrievalResult};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;
use tracing::debug;

/// Maps batches of text to fixed-dimension float vectors.
///
/// Implementations must be thread-safe. Output order matches input order,
/// and the same text always maps to the same vector within one process.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    fn embed(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>>;

    /// Identifier of the underlying model, recorded in the index manifest.
    fn id(&self) -> &str;
}

/// Resolve a model name to a fastembed model.
///
/// Accepts both the bare model name and the `sentence-transformers/`-style
/// qualified name.
pub fn parse_embedding_model(name: &str) -> RetrievalResult<EmbeddingModel> {
    let bare = name.rsplit('/').next().unwrap_or(name);
    match bare.to_lowercase().as_str() {
        "paraphrase-multilingual-minilm-l12-v2" | "paraphrasemlminilml12v2" => {
            Ok(EmbeddingModel::ParaphraseMLMiniLML12V2)
        }
        "all-minilm-l6-v2" | "allminilml6v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l6-v2-q" | "allminilml6v2q" => Ok(EmbeddingModel::AllMiniLML6V2Q),
        "multilingual-e5-small" | "multilinguale5small" => {
            Ok(EmbeddingModel::MultilingualE5Small)
        }
        _ => Err(RetrievalError::Config {
            reason: format!(
                "unknown embedding model '{name}'. Supported: \
                 paraphrase-multilingual-MiniLM-L12-v2, all-MiniLM-L6-v2, \
                 all-MiniLM-L6-v2-q, multilingual-e5-small"
            ),
        }),
    }
}

/// Canonical name for a supported fastembed model.
#[must_use]
pub fn model_to_string(model: &EmbeddingModel) -> &'static str {
    match model {
        EmbeddingModel::ParaphraseMLMiniLML12V2 => "paraphrase-multilingual-MiniLM-L12-v2",
        EmbeddingModel::AllMiniLML6V2 => "all-MiniLM-L6-v2",
        EmbeddingModel::AllMiniLML6V2Q => "all-MiniLM-L6-v2-q",
        EmbeddingModel::MultilingualE5Small => "multilingual-e5-small",
        _ => "unsupported",
    }
}

/// Fastembed-backed embedder.
///
/// The model sits behind a mutex because fastembed's `embed` takes
/// `&mut self`; one embedding call runs at a time per instance.
pub struct FastEmbedEmbedder {
    model: Mutex<TextEmbedding>,
    model_id: String,
}

impl std::fmt::Debug for FastEmbedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedEmbedder")
            .field("model_id", &self.model_id)
            .field("model", &"<TextEmbedding>")
            .finish()
    }
}

impl FastEmbedEmbedder {
    /// Initialize the model by name with quiet defaults.
    ///
    /// The first use downloads the model weights; this can block for a
    /// while and needs network access.
    pub fn new(model_name: &str) -> RetrievalResult<Self> {
        Self::with_options(model_name, Device::Cpu, false)
    }

    /// Initialize with a device hint and optional download progress.
    pub fn with_options(
        model_name: &str,
        device: Device,
        show_download_progress: bool,
    ) -> RetrievalResult<Self> {
        let model = parse_embedding_model(model_name)?;
        debug!(
            "initializing embedding model '{}' (device hint: {device})",
            model_to_string(&model)
        );

        let text_model = TextEmbedding::try_new(
            InitOptions::new(model.clone()).with_show_download_progress(show_download_progress),
        )
        .map_err(|e| {
            RetrievalError::Embedding(format!(
                "failed to initialize '{model_name}': {e}. \
                 The first run needs internet access to download the model"
            ))
        })?;

        Ok(Self {
            model: Mutex::new(text_model),
            model_id: model_to_string(&model).to_string(),
        })
    }
}

impl Embedder for FastEmbedEmbedder {
    fn embed(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.model
            .lock()
            .map_err(|_| {
                RetrievalError::Embedding(
                    "embedding model lock poisoned by a panic in another thread".to_string(),
                )
            })?
            .embed(texts.to_vec(), None)
            .map_err(|e| RetrievalError::Embedding(format!("failed to embed batch: {e}")))
    }

    fn id(&self) -> &str {
        &self.model_id
    }
}

/// Deterministic embedder for unit tests: no model download, stable output.
///
/// Hashes each word onto a fixed-dimension vector so that texts sharing
/// words land near each other.
#[cfg(test)]
pub struct StubEmbedder {
    dimension: usize,
}

#[cfg(test)]
impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[cfg(test)]
impl Embedder for StubEmbedder {
    fn embed(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        let embeddings = texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for word in text.split_whitespace() {
                    let mut hash = 0usize;
                    for byte in word.bytes() {
                        hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
                    }
                    vector[hash % self.dimension] += 1.0;
                }
                vector
            })
            .collect();
        Ok(embeddings)
    }

    fn id(&self) -> &str {
        "stub"
    }
}
