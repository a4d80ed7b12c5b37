//! Partitioned (IVF-flat) index: cluster-pruned approximate search.
//!
//! Training clusters a sample of vectors into `nlist` centroids; every
//! added vector lands in the inverted list of its nearest centroid. A
//! search scores the `nprobe` nearest lists only, trading a little recall
//! for sub-linear scan cost.

use crate::error::{RetrievalError, RetrievalResult};
use crate::index::{Metric, kmeans_clustering, rank_candidates, validate_dimension};
use crate::types::VectorId;
use bincode::{Decode, Encode};
use tracing::debug;

#[derive(Debug, Encode, Decode)]
pub struct IvfFlatIndex {
    dimension: usize,
    metric: Metric,
    nlist: usize,
    nprobe: usize,
    /// Empty until trained.
    centroids: Vec<Vec<f32>>,
    /// Vector ids per centroid, parallel to `centroids`.
    lists: Vec<Vec<u32>>,
    /// All vectors in id order.
    vectors: Vec<Vec<f32>>,
}

impl IvfFlatIndex {
    /// Untrained index. Inner-product metric, matching the normalized
    /// embeddings this index is built for.
    #[must_use]
    pub fn new(dimension: usize, nlist: usize, nprobe: usize) -> Self {
        Self {
            dimension,
            metric: Metric::InnerProduct,
            nlist,
            nprobe,
            centroids: Vec::new(),
            lists: Vec::new(),
            vectors: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Train cluster centroids. Must complete before any `add`.
    ///
    /// `nlist` greater than the training set size is a fatal configuration
    /// error; training wants at least as many points as clusters, ideally
    /// an order of magnitude more.
    pub fn train(&mut self, vectors: &[Vec<f32>]) -> RetrievalResult<()> {
        if vectors.len() < self.nlist {
            return Err(RetrievalError::Config {
                reason: format!(
                    "nlist ({}) exceeds the number of training vectors ({}); \
                     use a smaller nlist or a flat index",
                    self.nlist,
                    vectors.len()
                ),
            });
        }
        for vector in vectors {
            validate_dimension(self.dimension, vector)?;
        }

        let result = kmeans_clustering(vectors, self.nlist, self.metric)?;
        debug!(
            "trained {} centroids in {} iterations",
            self.nlist, result.iterations
        );
        self.centroids = result.centroids;
        self.lists = vec![Vec::new(); self.nlist];
        Ok(())
    }

    /// Append vectors in id order, routing each to its nearest list.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> RetrievalResult<()> {
        if !self.is_trained() {
            return Err(RetrievalError::Config {
                reason: "partitioned index must be trained before vectors are added".to_string(),
            });
        }
        for vector in vectors {
            validate_dimension(self.dimension, vector)?;
        }

        for vector in vectors {
            let id = self.vectors.len() as u32;
            let list = crate::index::nearest_centroid(vector, &self.centroids, self.metric);
            self.lists[list].push(id);
            self.vectors.push(vector.clone());
        }
        Ok(())
    }

    /// Search the `nprobe` nearest inverted lists for the top `k` vectors.
    pub fn search(&self, query: &[f32], k: usize) -> RetrievalResult<Vec<(VectorId, f32)>> {
        validate_dimension(self.dimension, query)?;
        if self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let probes = self.nprobe.min(self.centroids.len());
        let probed = rank_candidates(
            self.centroids
                .iter()
                .enumerate()
                .map(|(i, centroid)| (VectorId::new(i as u32), self.metric.score(query, centroid)))
                .collect(),
            probes,
        );

        let mut candidates = Vec::new();
        for (list_id, _) in probed {
            for &id in &self.lists[list_id.as_usize()] {
                let score = self.metric.score(query, &self.vectors[id as usize]);
                candidates.push((VectorId::new(id), score));
            }
        }

        Ok(rank_candidates(candidates, k))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    #[must_use]
    pub fn nlist(&self) -> usize {
        self.nlist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::l2_normalize;

    fn ring_vectors(n: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                let angle = i as f32 * std::f32::consts::TAU / n as f32;
                let mut v = vec![angle.cos(), angle.sin(), 0.1];
                l2_normalize(&mut v);
                v
            })
            .collect()
    }

    #[test]
    fn test_add_before_train_fails() {
        let mut index = IvfFlatIndex::new(3, 2, 1);
        let err = index.add(&[vec![1.0, 0.0, 0.0]]).unwrap_err();
        assert_eq!(err.category(), "CONFIG");
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_nlist_exceeding_vectors_fails_before_insertion() {
        let mut index = IvfFlatIndex::new(3, 10, 2);
        let vectors = ring_vectors(4);
        let err = index.train(&vectors).unwrap_err();
        assert_eq!(err.category(), "CONFIG");
        assert!(!index.is_trained());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_nlist_equal_to_vector_count_is_allowed() {
        let mut index = IvfFlatIndex::new(3, 4, 4);
        let vectors = ring_vectors(4);
        index.train(&vectors).unwrap();
        index.add(&vectors).unwrap();
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_self_query_finds_vector_when_probing_all_lists() {
        let vectors = ring_vectors(24);
        let mut index = IvfFlatIndex::new(3, 4, 4);
        index.train(&vectors).unwrap();
        index.add(&vectors).unwrap();

        // nprobe == nlist makes the search exhaustive.
        for (i, vector) in vectors.iter().enumerate() {
            let results = index.search(vector, 1).unwrap();
            assert_eq!(results[0].0.get(), i as u32);
            assert!((results[0].1 - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_probing_fewer_lists_returns_sorted_subset() {
        let vectors = ring_vectors(40);
        let mut index = IvfFlatIndex::new(3, 8, 2);
        index.train(&vectors).unwrap();
        index.add(&vectors).unwrap();

        let results = index.search(&vectors[7], 10).unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 10);
        for window in results.windows(2) {
            assert!(window[0].1 >= window[1].1);
        }
    }

    #[test]
    fn test_empty_trained_index_returns_nothing() {
        let mut index = IvfFlatIndex::new(3, 2, 1);
        index.train(&ring_vectors(8)).unwrap();
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }
}
