use super::accumulator::PartialAccumulator;
use super::centroid::CentroidSet;
use crate::config::{EmptyClusterPolicy, RunConfig};
use crate::error::ClusterError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Outcome of one aggregation step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceState {
    /// 1-based iteration number
    pub iteration: usize,
    pub max_displacement: f64,
    pub should_continue: bool,
}

/// What the coordinator broadcasts after every aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub state: ConvergenceState,
    pub centroids: CentroidSet,
    /// Records assigned to each cluster in this iteration
    pub cluster_sizes: Vec<u64>,
    /// Clusters that kept their previous centroid because nothing was assigned
    pub empty_clusters: Vec<usize>,
}

/// Continue while centroids still move by at least `threshold` and the
/// iteration cap has not been reached
pub fn should_continue(max_displacement: f64, iteration: usize, config: &RunConfig) -> bool {
    max_displacement >= config.threshold && iteration < config.max_iterations
}

/// Turn the globally reduced sums and counts into the next centroid set.
///
/// A cluster with no records either keeps its previous centroid or fails the
/// run, depending on `config.empty_cluster`. It never divides by zero.
pub fn aggregate(
    previous: &CentroidSet,
    total: &PartialAccumulator,
    iteration: usize,
    config: &RunConfig,
) -> Result<Decision, ClusterError> {
    let mut next = CentroidSet::zeros(previous.k(), previous.dim());
    let mut empty_clusters = Vec::new();

    for i in 0..previous.k() {
        let count = total.count(i);
        if count == 0 {
            match config.empty_cluster {
                EmptyClusterPolicy::Fail => {
                    return Err(ClusterError::EmptyCluster {
                        cluster: i,
                        iteration,
                    })
                }
                EmptyClusterPolicy::RetainPrevious => {
                    warn!(cluster = i, iteration, "empty cluster keeps its previous centroid");
                    next.centroid_mut(i).copy_from_slice(previous.centroid(i));
                    empty_clusters.push(i);
                }
            }
            continue;
        }

        let n = count as f64;
        for (out, s) in next.centroid_mut(i).iter_mut().zip(total.sum(i)) {
            *out = s / n;
        }
    }

    let max_displacement = next.max_displacement(previous);
    Ok(Decision {
        state: ConvergenceState {
            iteration,
            max_displacement,
            should_continue: should_continue(max_displacement, iteration, config),
        },
        centroids: next,
        cluster_sizes: total.counts().to_vec(),
        empty_clusters,
    })
}
