use super::distance::euclidean_distance;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// K centroids of `dim` values each, stored row-major.
///
/// Every rank holds a bit-identical copy after each broadcast; only the
/// coordinator ever computes a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidSet {
    k: usize,
    dim: usize,
    values: Vec<f64>,
}

impl CentroidSet {
    /// All-zero set of `k` centroids
    pub fn zeros(k: usize, dim: usize) -> Self {
        Self {
            k,
            dim,
            values: vec![0.0; k * dim],
        }
    }

    /// Build from one vector per cluster. All rows must share a non-zero length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, ConfigError> {
        let k = rows.len();
        if k == 0 {
            return Err(ConfigError::ZeroClusters);
        }
        let dim = rows[0].len();
        if dim == 0 {
            return Err(ConfigError::ZeroDimension);
        }

        let mut values = Vec::with_capacity(k * dim);
        for row in &rows {
            if row.len() != dim {
                return Err(ConfigError::ShapeMismatch {
                    k,
                    dim,
                    actual_k: k,
                    actual_dim: row.len(),
                });
            }
            values.extend_from_slice(row);
        }

        Ok(Self { k, dim, values })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Centroid of cluster `i`
    pub fn centroid(&self, i: usize) -> &[f64] {
        &self.values[i * self.dim..(i + 1) * self.dim]
    }

    pub fn centroid_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.values[i * self.dim..(i + 1) * self.dim]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks_exact(self.dim)
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.iter().map(|c| c.to_vec()).collect()
    }

    /// Fail unless this set is `k` x `dim`
    pub fn check_shape(&self, k: usize, dim: usize) -> Result<(), ConfigError> {
        if self.k != k || self.dim != dim {
            return Err(ConfigError::ShapeMismatch {
                k,
                dim,
                actual_k: self.k,
                actual_dim: self.dim,
            });
        }
        Ok(())
    }

    /// Index of and distance to the closest centroid.
    ///
    /// Ties go to the lowest cluster index: a later centroid only wins when it
    /// is strictly closer.
    pub fn nearest(&self, point: &[f64]) -> (usize, f64) {
        let mut best = 0;
        let mut best_dist = euclidean_distance(self.centroid(0), point);
        for i in 1..self.k {
            let dist = euclidean_distance(self.centroid(i), point);
            if dist < best_dist {
                best = i;
                best_dist = dist;
            }
        }
        (best, best_dist)
    }

    /// Largest distance any centroid moved between `self` and `previous`
    pub fn max_displacement(&self, previous: &CentroidSet) -> f64 {
        self.iter()
            .zip(previous.iter())
            .map(|(new, old)| euclidean_distance(new, old))
            .fold(0.0, f64::max)
    }
}
