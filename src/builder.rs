//! Index construction: records in, (index, metadata, stats) out.
//!
//! The builder drains a record stream, embeds the designated texts in
//! batches, and populates a vector index plus the parallel metadata store.
//! Vector ids are defined here once and for all: id N is the N-th kept
//! record, and the metadata store mirrors that order exactly.

use crate::config::{IndexConfig, IndexKind};
use crate::embedding::Embedder;
use crate::error::{RetrievalError, RetrievalResult};
use crate::index::{Metric, VectorIndex, l2_normalize};
use crate::loader::RecordReader;
use crate::metadata::MetadataStore;
use crate::types::BuildStats;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Orchestrates embedding and index construction for one corpus snapshot.
pub struct IndexBuilder<'a> {
    config: &'a IndexConfig,
    embedder: &'a dyn Embedder,
}

impl<'a> IndexBuilder<'a> {
    /// Validates the configuration eagerly; no work happens on failure.
    pub fn new(config: &'a IndexConfig, embedder: &'a dyn Embedder) -> RetrievalResult<Self> {
        config.validate()?;
        Ok(Self { config, embedder })
    }

    /// Build an immutable index from a record stream.
    ///
    /// Fatal on an empty kept-record set and on any embedder failure; no
    /// partial index is ever produced.
    pub fn build(
        &self,
        mut reader: RecordReader,
    ) -> RetrievalResult<(VectorIndex, MetadataStore, BuildStats)> {
        let mut texts: Vec<String> = Vec::new();
        let mut metadata = MetadataStore::new();
        for record in reader.by_ref() {
            texts.push(self.config.text_field.of(&record).to_string());
            metadata.push(record);
        }
        let records_seen = reader.records_seen();

        if texts.is_empty() {
            return Err(RetrievalError::EmptyCorpus {
                path: reader.path().to_path_buf(),
            });
        }
        info!(
            "embedding {} texts from field '{}' with model '{}'",
            texts.len(),
            self.config.text_field.name(),
            self.embedder.id()
        );

        let mut embeddings = self.embed_all(&texts)?;
        if self.config.normalize_embeddings {
            for embedding in &mut embeddings {
                l2_normalize(embedding);
            }
        }

        // Dimension is model-defined; take it from the first embedding.
        let dimension = embeddings[0].len();
        let mut index = match self.config.index_kind {
            IndexKind::FlatIp => VectorIndex::flat(dimension, Metric::InnerProduct),
            IndexKind::FlatL2 => VectorIndex::flat(dimension, Metric::L2),
            IndexKind::IvfFlat => {
                let mut index =
                    VectorIndex::partitioned(dimension, self.config.nlist, self.config.nprobe);
                // Training must fully complete before any insertion.
                index.train(&embeddings)?;
                index
            }
        };
        index.add(&embeddings)?;

        debug_assert_eq!(index.len(), metadata.len());
        let stats = BuildStats {
            records_seen,
            records_indexed: index.len(),
            dimension,
            index_kind: self.config.index_kind,
            model: self.embedder.id().to_string(),
        };
        info!(
            "index built: {} of {} records indexed, dimension {}, type {}",
            stats.records_indexed, stats.records_seen, stats.dimension, stats.index_kind
        );

        Ok((index, metadata, stats))
    }

    /// Embed all texts in `batch_size` chunks, preserving submission order.
    ///
    /// Batch boundaries are invisible to the caller: the output is one
    /// vector per input text, in input order.
    fn embed_all(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        let progress = if self.config.show_progress {
            let bar = ProgressBar::new(texts.len() as u64);
            bar.set_style(
                ProgressStyle::with_template(
                    "{bar:40.cyan/blue} {pos}/{len} texts embedded ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            let batch_embeddings = self.embedder.embed(batch)?;
            if batch_embeddings.len() != batch.len() {
                return Err(RetrievalError::Embedding(format!(
                    "embedder returned {} vectors for a batch of {}",
                    batch_embeddings.len(),
                    batch.len()
                )));
            }
            embeddings.extend(batch_embeddings);
            progress.inc(batch.len() as u64);
        }
        progress.finish_and_clear();

        let dimension = embeddings[0].len();
        for embedding in &embeddings {
            if embedding.len() != dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }
        }
        Ok(embeddings)
    }
}
