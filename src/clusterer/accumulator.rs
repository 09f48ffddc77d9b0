use super::centroid::CentroidSet;
use crate::dataset::FeatureRecord;
use serde::{Deserialize, Serialize};

/// Per-rank running sums and counts for one iteration.
///
/// Built fresh every iteration, reduced into the global total on the
/// coordinator and then dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialAccumulator {
    k: usize,
    dim: usize,
    sums: Vec<f64>,
    counts: Vec<u64>,
}

impl PartialAccumulator {
    pub fn new(k: usize, dim: usize) -> Self {
        Self {
            k,
            dim,
            sums: vec![0.0; k * dim],
            counts: vec![0; k],
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Elementwise sum of the vectors assigned to `cluster`
    pub fn sum(&self, cluster: usize) -> &[f64] {
        &self.sums[cluster * self.dim..(cluster + 1) * self.dim]
    }

    pub fn count(&self, cluster: usize) -> u64 {
        self.counts[cluster]
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Number of vectors accumulated over all clusters
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Add `vector` to `cluster`'s running sum and count
    pub fn add(&mut self, cluster: usize, vector: &[f64]) {
        debug_assert_eq!(vector.len(), self.dim);
        self.counts[cluster] += 1;
        let sum = &mut self.sums[cluster * self.dim..(cluster + 1) * self.dim];
        for (s, v) in sum.iter_mut().zip(vector) {
            *s += v;
        }
    }

    /// Assign `vector` to its nearest centroid and accumulate it there
    pub fn assign(&mut self, centroids: &CentroidSet, vector: &[f64]) -> usize {
        let (cluster, _) = centroids.nearest(vector);
        self.add(cluster, vector);
        cluster
    }

    /// Combine two accumulators: sums elementwise, counts by integer addition
    pub fn merge(mut self, other: PartialAccumulator) -> PartialAccumulator {
        debug_assert_eq!((self.k, self.dim), (other.k, other.dim));
        for (s, o) in self.sums.iter_mut().zip(&other.sums) {
            *s += o;
        }
        for (c, o) in self.counts.iter_mut().zip(&other.counts) {
            *c += o;
        }
        self
    }
}

/// Assign every record of a partition to its nearest centroid
pub fn assign_partition(centroids: &CentroidSet, records: &[FeatureRecord]) -> PartialAccumulator {
    let mut acc = PartialAccumulator::new(centroids.k(), centroids.dim());
    for record in records {
        acc.assign(centroids, &record.vector);
    }
    acc
}
