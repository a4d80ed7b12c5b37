//! K-means clustering for the partitioned index.
//!
//! K-means++ initialization, metric-aware assignment, bounded iterations.
//! With inner-product metric the centroids stay unit-normalized so that
//! assignment matches what search does on normalized embeddings.

use crate::error::{RetrievalError, RetrievalResult};
use crate::index::Metric;
use rand::Rng;
use rayon::prelude::*;
use tracing::warn;

/// Maximum number of K-means iterations.
const MAX_ITERATIONS: usize = 100;

/// Convergence tolerance for centroid movement.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Result of one clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// `k` centroids, same dimension as the input vectors.
    pub centroids: Vec<Vec<f32>>,
    /// Cluster index for each input vector.
    pub assignments: Vec<usize>,
    /// Iterations until convergence.
    pub iterations: usize,
}

/// Cluster `vectors` into `k` groups.
///
/// Requires `1 <= k <= vectors.len()` and uniform dimensions. Returns the
/// best state reached even if the run hits the iteration cap.
pub fn kmeans_clustering(
    vectors: &[Vec<f32>],
    k: usize,
    metric: Metric,
) -> RetrievalResult<KMeansResult> {
    if vectors.is_empty() {
        return Err(RetrievalError::Config {
            reason: "cannot cluster an empty vector set".to_string(),
        });
    }
    if k == 0 || k > vectors.len() {
        return Err(RetrievalError::Config {
            reason: format!(
                "cluster count must be between 1 and the number of vectors ({}), got {k}",
                vectors.len()
            ),
        });
    }
    let dimension = vectors[0].len();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(RetrievalError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }

    let mut centroids = initialize_kmeans_plus_plus(vectors, k, metric);
    let mut assignments = vec![0usize; vectors.len()];
    let mut iterations = 0;

    loop {
        iterations += 1;

        let new_assignments: Vec<usize> = vectors
            .par_iter()
            .map(|vector| nearest_centroid(vector, &centroids, metric))
            .collect();

        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= MAX_ITERATIONS {
            break;
        }

        let new_centroids = update_centroids(vectors, &assignments, k, metric);
        let movement = centroid_movement(&centroids, &new_centroids, metric);
        centroids = new_centroids;

        if movement < CONVERGENCE_TOLERANCE {
            break;
        }
    }

    if iterations >= MAX_ITERATIONS {
        warn!("k-means did not fully converge after {MAX_ITERATIONS} iterations");
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Index of the centroid with the best metric score for `vector`.
#[must_use]
pub fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>], metric: Metric) -> usize {
    let mut best_score = f32::NEG_INFINITY;
    let mut best = 0;
    for (i, centroid) in centroids.iter().enumerate() {
        let score = metric.score(vector, centroid);
        if score > best_score {
            best_score = score;
            best = i;
        }
    }
    best
}

/// Recompute centroids as the mean of their assigned vectors.
///
/// An empty cluster is reseeded from a random input vector so every list
/// stays usable for probing.
fn update_centroids(
    vectors: &[Vec<f32>],
    assignments: &[usize],
    k: usize,
    metric: Metric,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut centroids = vec![vec![0.0f32; dimension]; k];
    let mut sizes = vec![0usize; k];

    for (vector, &cluster) in vectors.iter().zip(assignments.iter()) {
        for (slot, &value) in centroids[cluster].iter_mut().zip(vector.iter()) {
            *slot += value;
        }
        sizes[cluster] += 1;
    }

    for (centroid, &size) in centroids.iter_mut().zip(sizes.iter()) {
        if size == 0 {
            let random_idx = rand::rng().random_range(0..vectors.len());
            centroid.clone_from(&vectors[random_idx]);
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
        }
        if metric == Metric::InnerProduct {
            crate::index::l2_normalize(centroid);
        }
    }

    centroids
}

/// K-means++ seeding: spread initial centroids apart by picking each next
/// seed with probability proportional to its squared distance from the
/// nearest existing seed.
fn initialize_kmeans_plus_plus(vectors: &[Vec<f32>], k: usize, metric: Metric) -> Vec<Vec<f32>> {
    let mut rng = rand::rng();
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);

    let first = rng.random_range(0..vectors.len());
    centroids.push(seed_centroid(&vectors[first], metric));

    while centroids.len() < k {
        let distances: Vec<f32> = vectors
            .par_iter()
            .map(|vector| {
                let mut min_distance = f32::MAX;
                for centroid in &centroids {
                    min_distance = min_distance.min(metric.distance(vector, centroid));
                }
                min_distance * min_distance
            })
            .collect();
        let total: f32 = distances.iter().sum();

        if total < EPSILON {
            // All remaining points coincide with existing seeds; duplicate
            // seeds still yield valid (if redundant) clusters.
            let idx = rng.random_range(0..vectors.len());
            centroids.push(seed_centroid(&vectors[idx], metric));
            continue;
        }

        let target = rng.random::<f32>() * total;
        let mut cumulative = 0.0;
        let mut chosen = vectors.len() - 1;
        for (i, &distance) in distances.iter().enumerate() {
            cumulative += distance;
            if cumulative >= target {
                chosen = i;
                break;
            }
        }
        centroids.push(seed_centroid(&vectors[chosen], metric));
    }

    centroids
}

fn seed_centroid(vector: &[f32], metric: Metric) -> Vec<f32> {
    let mut centroid = vector.to_vec();
    if metric == Metric::InnerProduct {
        crate::index::l2_normalize(&mut centroid);
    }
    centroid
}

/// Mean per-centroid movement between two iterations.
fn centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>], metric: Metric) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(a, b)| metric.distance(a, b))
        .sum::<f32>()
        / old.len() as f32
}
