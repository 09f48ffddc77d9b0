// Public API exports
pub mod classifier;
pub mod clusterer;
pub mod comm;
pub mod config;
pub mod dataset;
pub mod error;
pub mod launcher;
pub mod logging;
pub mod output;
pub mod partition;
pub mod session;

// Re-export main types for convenience
pub use config::{EmptyClusterPolicy, InitStrategy, RunConfig, WorldConfig};
pub use error::{ClusterError, CommError, ConfigError, EngineError, RecordError};

pub use dataset::{
    fingerprint, list_dataset, parse_record, read_record, FeatureRecord, FileDataset, Label,
    MemoryDataset, RecordSource,
};
pub use partition::{partition_range, Partition};

pub use comm::{broadcast, gather, reduce, Communicator, Frame, LocalCommunicator, LocalWorld, TcpCommunicator};
pub use session::Session;

pub use clusterer::{CentroidSet, ConvergenceState, DistributedKMeans, PartialAccumulator, TrainOutcome};
pub use classifier::{ClassificationResult, Classifier};

pub use output::{read_centroids, write_centroids, RunReport};
