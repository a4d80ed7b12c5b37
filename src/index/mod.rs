//! Vector index construction and nearest-neighbor search.
//!
//! One [`VectorIndex`] interface with two variants: an exact flat index and
//! an approximate partitioned (IVF-flat) index that prunes the search space
//! with cluster centroids. Both return scores where higher always means
//! more similar, regardless of metric.

mod clustering;
mod flat;
mod ivf;

pub use clustering::{KMeansResult, kmeans_clustering, nearest_centroid};
pub use flat::FlatIndex;
pub use ivf::IvfFlatIndex;

use crate::config::IndexKind;
use crate::error::{RetrievalError, RetrievalResult};
use crate::types::VectorId;
use bincode::{Decode, Encode};

/// Similarity metric for vector comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum Metric {
    /// Dot product. Equals cosine similarity on unit-normalized vectors.
    InnerProduct,
    /// Euclidean distance, reported as a negative score.
    L2,
}

impl Metric {
    /// Similarity score: higher means more similar for both metrics.
    #[must_use]
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vectors must have the same dimension");
        match self {
            Self::InnerProduct => a.iter().zip(b.iter()).map(|(x, y)| x * y).sum(),
            Self::L2 => -self.distance(a, b),
        }
    }

    /// Non-negative distance, used by clustering.
    #[must_use]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            // Cosine-style distance; meaningful on normalized vectors.
            Self::InnerProduct => (1.0 - self.score(a, b)).max(0.0),
            Self::L2 => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

/// Scale a vector to unit L2 norm in place. Zero vectors stay untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// An immutable-once-built vector index.
///
/// `add` assigns vector ids by insertion order; id N is the N-th vector
/// ever added. Search results come back ordered by descending score with
/// ascending-id tie-breaking, so result order is deterministic.
#[derive(Debug, Encode, Decode)]
pub enum VectorIndex {
    Flat(FlatIndex),
    Ivf(IvfFlatIndex),
}

impl VectorIndex {
    /// Exact index with the given metric.
    #[must_use]
    pub fn flat(dimension: usize, metric: Metric) -> Self {
        Self::Flat(FlatIndex::new(dimension, metric))
    }

    /// Partitioned index over `nlist` clusters, probing `nprobe` at search
    /// time. Uses inner product, matching normalized embeddings.
    #[must_use]
    pub fn partitioned(dimension: usize, nlist: usize, nprobe: usize) -> Self {
        Self::Ivf(IvfFlatIndex::new(dimension, nlist, nprobe))
    }

    /// Train the partitioned variant on a sample of vectors. No-op for
    /// flat indexes.
    pub fn train(&mut self, vectors: &[Vec<f32>]) -> RetrievalResult<()> {
        match self {
            Self::Flat(_) => Ok(()),
            Self::Ivf(index) => index.train(vectors),
        }
    }

    /// Append vectors in id order.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> RetrievalResult<()> {
        match self {
            Self::Flat(index) => index.add(vectors),
            Self::Ivf(index) => index.add(vectors),
        }
    }

    /// Top-`k` nearest vectors by the index's native metric.
    pub fn search(&self, query: &[f32], k: usize) -> RetrievalResult<Vec<(VectorId, f32)>> {
        match self {
            Self::Flat(index) => index.search(query, k),
            Self::Ivf(index) => index.search(query, k),
        }
    }

    /// Number of indexed vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(index) => index.len(),
            Self::Ivf(index) => index.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        match self {
            Self::Flat(index) => index.dimension(),
            Self::Ivf(index) => index.dimension(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Flat(index) => match index.metric() {
                Metric::InnerProduct => IndexKind::FlatIp,
                Metric::L2 => IndexKind::FlatL2,
            },
            Self::Ivf(_) => IndexKind::IvfFlat,
        }
    }
}

pub(crate) fn validate_dimension(expected: usize, vector: &[f32]) -> RetrievalResult<()> {
    if vector.len() != expected {
        return Err(RetrievalError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Sort (id, score) candidates by descending score, ascending id on ties,
/// and keep the top `k`.
pub(crate) fn rank_candidates(mut candidates: Vec<(VectorId, f32)>, k: usize) -> Vec<(VectorId, f32)> {
    candidates.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    candidates.truncate(k);
    candidates
}
