mod accumulator;
mod aggregate;
mod centroid;
mod distance;
mod init;
mod kmeans;
mod types;

#[cfg(test)]
mod tests;

pub use accumulator::{assign_partition, PartialAccumulator};
pub use aggregate::{aggregate, should_continue, ConvergenceState, Decision};
pub use centroid::CentroidSet;
pub use distance::{euclidean_distance, squared_distance};
pub use init::{initial_centroids, initial_indices};
pub use kmeans::DistributedKMeans;
pub use types::TrainOutcome;
