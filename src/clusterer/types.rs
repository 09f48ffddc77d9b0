use super::aggregate::ConvergenceState;
use super::centroid::CentroidSet;
use uuid::Uuid;

/// Result of a distributed k-means run, identical on every rank
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub run_id: Uuid,
    pub centroids: CentroidSet,
    pub iterations: usize,
    /// True when the last displacement fell below the threshold, false when
    /// the iteration cap stopped the run
    pub converged: bool,
    /// One entry per iteration, in order
    pub history: Vec<ConvergenceState>,
    /// Records assigned to each cluster in the final iteration
    pub cluster_sizes: Vec<u64>,
    pub records: usize,
    pub world_size: usize,
    pub fingerprint: String,
}

impl TrainOutcome {
    pub fn final_displacement(&self) -> f64 {
        self.history
            .last()
            .map(|s| s.max_displacement)
            .unwrap_or(f64::INFINITY)
    }
}
