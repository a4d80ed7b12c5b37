//! Exact flat index: brute-force scan over all vectors.

use crate::error::RetrievalResult;
use crate::index::{Metric, rank_candidates, validate_dimension};
use crate::types::VectorId;
use bincode::{Decode, Encode};
use rayon::prelude::*;

/// Stores every vector and scores all of them per query.
///
/// No training step; results are exact for the configured metric.
#[derive(Debug, Encode, Decode)]
pub struct FlatIndex {
    dimension: usize,
    metric: Metric,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    #[must_use]
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            vectors: Vec::new(),
        }
    }

    /// Append vectors; ids continue from the current count.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> RetrievalResult<()> {
        for vector in vectors {
            validate_dimension(self.dimension, vector)?;
        }
        self.vectors.extend_from_slice(vectors);
        Ok(())
    }

    /// Score every stored vector against `query` and keep the top `k`.
    pub fn search(&self, query: &[f32], k: usize) -> RetrievalResult<Vec<(VectorId, f32)>> {
        validate_dimension(self.dimension, query)?;
        if self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let candidates: Vec<(VectorId, f32)> = self
            .vectors
            .par_iter()
            .enumerate()
            .map(|(i, vector)| (VectorId::new(i as u32), self.metric.score(query, vector)))
            .collect();

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
    pub fn metric(&self) -> Metric {
        self.metric
    }
}
