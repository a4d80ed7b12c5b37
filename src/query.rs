//! Query execution over a loaded index.
//!
//! A [`QueryEngine`] owns an immutable index snapshot and answers
//! concurrent nearest-neighbor queries. The embedding model is not loaded
//! until the first query needs it, so opening an index for inspection
//! stays cheap.
//!
//! Each query runs a fixed pipeline: embed, coarse search, threshold
//! filter, metadata filter, optional rerank.

use crate::config::{IndexManifest, RetrievalConfig};
use crate::embedding::{Embedder, FastEmbedEmbedder};
use crate::error::{RetrievalError, RetrievalResult};
use crate::index::{VectorIndex, l2_normalize};
use crate::metadata::MetadataStore;
use crate::persistence;
use crate::types::{AlignmentRecord, ScoredResult};
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tracing::{debug, warn};

/// Second-stage scorer for reranking coarse candidates.
///
/// Scores are higher-is-better and replace the coarse similarity in the
/// returned results. A scorer never introduces new candidates.
pub trait Scorer: Send + Sync {
    fn score(&self, query: &str, record: &AlignmentRecord) -> RetrievalResult<f32>;
}

/// Per-query knobs layered on top of the engine's [`RetrievalConfig`].
#[derive(Default)]
pub struct QueryOptions<'a> {
    /// Overrides the configured similarity threshold for this query.
    pub threshold: Option<f32>,
    /// Keep only records the predicate accepts. Applied after the
    /// threshold, before any reranking.
    pub filter: Option<&'a (dyn Fn(&AlignmentRecord) -> bool + Sync)>,
    /// Rerank the coarse candidates with this scorer.
    pub scorer: Option<&'a dyn Scorer>,
}

type EmbedderFactory = Box<dyn Fn() -> RetrievalResult<Box<dyn Embedder>> + Send + Sync>;

/// Read-only search handle over one index snapshot.
pub struct QueryEngine {
    index: VectorIndex,
    metadata: MetadataStore,
    manifest: IndexManifest,
    retrieval: RetrievalConfig,
    embedder: OnceLock<Box<dyn Embedder>>,
    embedder_init: Mutex<()>,
    factory: EmbedderFactory,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("vectors", &self.index.len())
            .field("model", &self.manifest.model_name)
            .finish()
    }
}

impl QueryEngine {
    /// Open an index directory with default retrieval settings.
    ///
    /// The embedding model named in the manifest is instantiated lazily on
    /// the first query.
    pub fn open(dir: &Path) -> RetrievalResult<Self> {
        Self::open_with_config(dir, RetrievalConfig::default())
    }

    /// Open an index directory with explicit retrieval settings.
    pub fn open_with_config(dir: &Path, retrieval: RetrievalConfig) -> RetrievalResult<Self> {
        let (index, metadata, manifest) = persistence::load(dir)?;
        let model_name = manifest.model_name.clone();
        let factory: EmbedderFactory = Box::new(move || {
            FastEmbedEmbedder::new(&model_name).map(|e| Box::new(e) as Box<dyn Embedder>)
        });
        Ok(Self {
            index,
            metadata,
            manifest,
            retrieval,
            embedder: OnceLock::new(),
            embedder_init: Mutex::new(()),
            factory,
        })
    }

    /// Assemble an engine from already-built parts and a ready embedder.
    ///
    /// Used right after a build to serve queries without a reload, and by
    /// tests to substitute a deterministic embedder.
    pub fn from_parts(
        index: VectorIndex,
        metadata: MetadataStore,
        manifest: IndexManifest,
        retrieval: RetrievalConfig,
        embedder: Box<dyn Embedder>,
    ) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(embedder);
        Self {
            index,
            metadata,
            manifest,
            retrieval,
            embedder: cell,
            embedder_init: Mutex::new(()),
            factory: Box::new(|| {
                Err(RetrievalError::Embedding(
                    "no embedder factory configured".to_string(),
                ))
            }),
        }
    }

    #[must_use]
    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The lazily initialized embedder.
    ///
    /// The mutex serializes the expensive first load; every later call
    /// takes the lock-free fast path. A failed initialization is returned
    /// to this caller and retried by the next one.
    fn embedder(&self) -> RetrievalResult<&dyn Embedder> {
        if let Some(embedder) = self.embedder.get() {
            return Ok(embedder.as_ref());
        }
        let _guard = self.embedder_init.lock().map_err(|_| {
            RetrievalError::Embedding(
                "embedder initialization lock poisoned by a panic in another thread".to_string(),
            )
        })?;
        if self.embedder.get().is_none() {
            let embedder = (self.factory)()?;
            let _ = self.embedder.set(embedder);
        }
        // The cell is set exactly once under the guard above.
        self.embedder
            .get()
            .map(|e| e.as_ref())
            .ok_or_else(|| RetrievalError::Embedding("embedder initialization raced".to_string()))
    }

    /// Top-k search with the engine's configured defaults.
    pub fn query(&self, text: &str, top_k: Option<usize>) -> RetrievalResult<Vec<ScoredResult>> {
        self.query_with(text, top_k, &QueryOptions::default())
    }

    /// Full query pipeline with per-call options.
    ///
    /// `top_k` of zero and empty indexes both short-circuit to an empty
    /// result; neither is an error.
    pub fn query_with(
        &self,
        text: &str,
        top_k: Option<usize>,
        options: &QueryOptions<'_>,
    ) -> RetrievalResult<Vec<ScoredResult>> {
        let requested = top_k.unwrap_or(self.retrieval.default_top_k);
        if requested == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let k = requested.min(self.retrieval.max_top_k);

        let reranking = options.scorer.is_some() && self.retrieval.enable_reranking;
        // Reranking needs a wider coarse pool to choose from.
        let coarse_k = if reranking {
            k.max(self.retrieval.rerank_top_k).min(self.retrieval.max_top_k)
        } else {
            k
        };

        let query_vector = self.embed_query(text)?;
        let hits = self.index.search(&query_vector, coarse_k)?;

        let threshold = options
            .threshold
            .unwrap_or(self.retrieval.similarity_threshold);
        let mut results = Vec::with_capacity(hits.len());
        for (id, score) in hits {
            if score < threshold {
                continue;
            }
            let record = self.metadata.get(id).ok_or_else(|| {
                RetrievalError::Corrupted {
                    reason: format!("vector id {id} has no metadata record"),
                }
            })?;
            if self.retrieval.enable_metadata_filter {
                if let Some(filter) = options.filter {
                    if !filter(record) {
                        continue;
                    }
                }
            }
            results.push(ScoredResult {
                id,
                score,
                record: record.clone(),
            });
        }
        debug!(
            "query matched {} of {} coarse candidates (threshold {})",
            results.len(),
            coarse_k,
            threshold
        );

        if reranking {
            if let Some(scorer) = options.scorer {
                return Ok(self.rerank(text, results, scorer, k));
            }
        }
        results.truncate(k);
        Ok(results)
    }

    fn embed_query(&self, text: &str) -> RetrievalResult<Vec<f32>> {
        let mut vectors = self.embedder()?.embed(&[text.to_string()])?;
        if vectors.len() != 1 {
            return Err(RetrievalError::Embedding(format!(
                "embedder returned {} vectors for one query",
                vectors.len()
            )));
        }
        let mut vector = vectors.remove(0);
        if vector.len() != self.manifest.embedding_dim {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.manifest.embedding_dim,
                actual: vector.len(),
            });
        }
        if self.manifest.normalize_embeddings {
            l2_normalize(&mut vector);
        }
        Ok(vector)
    }

    /// Rescore the top candidates and keep the best `rerank_top_n`.
    ///
    /// A scorer failure downgrades the query to its coarse ordering rather
    /// than failing it.
    fn rerank(
        &self,
        text: &str,
        coarse: Vec<ScoredResult>,
        scorer: &dyn Scorer,
        k: usize,
    ) -> Vec<ScoredResult> {
        let pool = self.retrieval.rerank_top_k.min(coarse.len());
        let mut rescored = Vec::with_capacity(pool);
        for i in 0..pool {
            match scorer.score(text, &coarse[i].record) {
                Ok(score) => rescored.push(ScoredResult {
                    id: coarse[i].id,
                    score,
                    record: coarse[i].record.clone(),
                }),
                Err(e) => {
                    warn!("reranking failed, keeping coarse order: {e}");
                    let mut fallback = coarse;
                    fallback.truncate(self.retrieval.rerank_top_n.min(k));
                    return fallback;
                }
            }
        }
        rescored.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        rescored.truncate(self.retrieval.rerank_top_n.min(k));
        rescored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, TextField};
    use crate::embedding::StubEmbedder;
    use crate::index::Metric;
    use crate::types::VectorId;

    fn record(id: u32, src: &str, part: &str) -> AlignmentRecord {
        AlignmentRecord {
            id,
            src_text: src.to_string(),
            tgt_text: format!("tgt {id}"),
            part: part.to_string(),
            src_indices: vec![],
            tgt_indices: vec![],
            alignment_type: "1-1".to_string(),
            src_chunks: vec![],
            tgt_chunks: vec![],
        }
    }

    /// Engine over the given source texts, embedded with the stub model.
    fn engine(texts: &[(&str, &str)], retrieval: RetrievalConfig) -> QueryEngine {
        let embedder = StubEmbedder::new(32);
        let sources: Vec<String> = texts.iter().map(|(s, _)| s.to_string()).collect();
        let mut embeddings = embedder.embed(&sources).unwrap();
        for e in &mut embeddings {
            l2_normalize(e);
        }

        let mut index = VectorIndex::flat(32, Metric::InnerProduct);
        index.add(&embeddings).unwrap();
        let mut metadata = MetadataStore::new();
        for (i, (src, part)) in texts.iter().enumerate() {
            metadata.push(record(i as u32, src, part));
        }

        let config = IndexConfig {
            text_field: TextField::SrcText,
            ..IndexConfig::default()
        };
        let manifest = IndexManifest::new(&config, 32, texts.len());
        QueryEngine::from_parts(index, metadata, manifest, retrieval, Box::new(embedder))
    }

    fn corpus() -> Vec<(&'static str, &'static str)> {
        vec![
            ("the red fox jumps", "part1"),
            ("a quiet winter morning", "part1"),
            ("shipping manifest for cargo", "part2"),
            ("the red fox sleeps", "part2"),
        ]
    }

    #[test]
    fn test_self_query_returns_exact_match_first() {
        let engine = engine(&corpus(), RetrievalConfig::default());
        let results = engine.query("the red fox jumps", Some(3)).unwrap();

        assert_eq!(results[0].id, VectorId::new(0));
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert_eq!(results[0].record.src_text, "the red fox jumps");
        // Shared words pull the other fox record above the unrelated ones.
        assert_eq!(results[1].id, VectorId::new(3));
    }

    #[test]
    fn test_top_k_zero_and_default() {
        let engine = engine(&corpus(), RetrievalConfig::default());
        assert!(engine.query("anything", Some(0)).unwrap().is_empty());

        // None falls back to default_top_k, capped by corpus size.
        let results = engine.query("the red fox jumps", None).unwrap();
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn test_top_k_capped_at_max() {
        let retrieval = RetrievalConfig {
            max_top_k: 2,
            ..RetrievalConfig::default()
        };
        let engine = engine(&corpus(), retrieval);
        let results = engine.query("the red fox jumps", Some(50)).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_threshold_drops_weak_matches() {
        let engine = engine(&corpus(), RetrievalConfig::default());
        let options = QueryOptions {
            threshold: Some(0.9),
            ..QueryOptions::default()
        };
        let results = engine
            .query_with("the red fox jumps", Some(10), &options)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, VectorId::new(0));

        // Raising the threshold never adds results.
        let loose = engine
            .query_with(
                "the red fox jumps",
                Some(10),
                &QueryOptions {
                    threshold: Some(0.1),
                    ..QueryOptions::default()
                },
            )
            .unwrap();
        assert!(loose.len() >= results.len());
    }

    #[test]
    fn test_metadata_filter_restricts_results() {
        let engine = engine(&corpus(), RetrievalConfig::default());
        let filter = |r: &AlignmentRecord| r.part == "part2";
        let options = QueryOptions {
            filter: Some(&filter),
            ..QueryOptions::default()
        };
        let results = engine
            .query_with("the red fox jumps", Some(10), &options)
            .unwrap();

        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.record.part == "part2"));
    }

    #[test]
    fn test_metadata_filter_can_be_disabled() {
        let retrieval = RetrievalConfig {
            enable_metadata_filter: false,
            ..RetrievalConfig::default()
        };
        let engine = engine(&corpus(), retrieval);
        let filter = |_: &AlignmentRecord| false;
        let options = QueryOptions {
            filter: Some(&filter),
            ..QueryOptions::default()
        };
        let results = engine
            .query_with("the red fox jumps", Some(10), &options)
            .unwrap();
        assert_eq!(results.len(), 4);
    }

    struct PartScorer;

    impl Scorer for PartScorer {
        fn score(&self, _query: &str, record: &AlignmentRecord) -> RetrievalResult<f32> {
            Ok(if record.part == "part2" { 2.0 } else { 1.0 })
        }
    }

    struct FailingScorer;

    impl Scorer for FailingScorer {
        fn score(&self, _query: &str, _record: &AlignmentRecord) -> RetrievalResult<f32> {
            Err(RetrievalError::Scorer("model unavailable".to_string()))
        }
    }

    #[test]
    fn test_rerank_reorders_and_truncates() {
        let retrieval = RetrievalConfig {
            enable_reranking: true,
            rerank_top_k: 4,
            rerank_top_n: 2,
            ..RetrievalConfig::default()
        };
        let engine = engine(&corpus(), retrieval);
        let options = QueryOptions {
            scorer: Some(&PartScorer),
            ..QueryOptions::default()
        };
        let results = engine
            .query_with("the red fox jumps", Some(10), &options)
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.record.part == "part2"));
        assert!((results[0].score - 2.0).abs() < f32::EPSILON);
        // Equal rerank scores break ties by vector id.
        assert!(results[0].id < results[1].id);
    }

    #[test]
    fn test_rerank_disabled_ignores_scorer() {
        let engine = engine(&corpus(), RetrievalConfig::default());
        let options = QueryOptions {
            scorer: Some(&PartScorer),
            ..QueryOptions::default()
        };
        let results = engine
            .query_with("the red fox jumps", Some(4), &options)
            .unwrap();
        // enable_reranking is off by default; coarse order survives.
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].id, VectorId::new(0));
    }

    #[test]
    fn test_rerank_failure_degrades_to_coarse_order() {
        let retrieval = RetrievalConfig {
            enable_reranking: true,
            rerank_top_k: 4,
            rerank_top_n: 3,
            ..RetrievalConfig::default()
        };
        let engine = engine(&corpus(), retrieval);
        let options = QueryOptions {
            scorer: Some(&FailingScorer),
            ..QueryOptions::default()
        };
        let results = engine
            .query_with("the red fox jumps", Some(10), &options)
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, VectorId::new(0));
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_missing_factory_surfaces_as_embedding_error() {
        let mut engine = engine(&corpus(), RetrievalConfig::default());
        engine.embedder = OnceLock::new();
        let err = engine.query("anything", Some(1)).unwrap_err();
        assert_eq!(err.category(), "COLLABORATOR");
    }
}
