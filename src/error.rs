use std::path::PathBuf;
use thiserror::Error;

/// Invalid run parameters. Always fatal, raised before any iteration starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Cluster count k must be at least 1")]
    ZeroClusters,

    #[error("Feature dimension must be at least 1")]
    ZeroDimension,

    #[error("max_iterations must be at least 1")]
    ZeroIterations,

    #[error("Threshold must be a finite, non-negative number (got {0})")]
    InvalidThreshold(f64),

    #[error("World size must be at least 1")]
    EmptyWorld,

    #[error("Rank {rank} is out of range for world size {size}")]
    RankOutOfRange { rank: usize, size: usize },

    #[error("World size {workers} exceeds record count {records}")]
    TooManyWorkers { workers: usize, records: usize },

    #[error("Cluster count k={k} exceeds record count {records}")]
    TooManyClusters { k: usize, records: usize },

    #[error("Centroid set is {actual_k}x{actual_dim}, expected {k}x{dim}")]
    ShapeMismatch {
        k: usize,
        dim: usize,
        actual_k: usize,
        actual_dim: usize,
    },

    #[error("Rank {rank} enumerated a different dataset ({fingerprint}, expected {expected})")]
    DatasetMismatch {
        rank: usize,
        fingerprint: String,
        expected: String,
    },

    #[error("Dataset directory contains no records: {0}")]
    EmptyDataset(PathBuf),

    #[error("Invalid configuration file {path}: {reason}")]
    InvalidFile { path: PathBuf, reason: String },
}

/// A feature record that could not be read or does not match the run shape.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Failed to read {source_name}: {reason}")]
    Io { source_name: String, reason: String },

    #[error("{source_name}:{line}: {reason}")]
    Malformed {
        source_name: String,
        line: usize,
        reason: String,
    },

    #[error("{source_name}: declared dimension {declared}, but run is configured for {expected}")]
    DimensionMismatch {
        source_name: String,
        declared: usize,
        expected: usize,
    },

    #[error("Record index {index} is out of range ({len} records)")]
    OutOfRange { index: usize, len: usize },
}

/// Failures of the collective layer. Any of these ends the run on every rank.
#[derive(Error, Debug)]
pub enum CommError {
    #[error("I/O error talking to rank {peer}: {source}")]
    Io {
        peer: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Rank {0} is unreachable")]
    PeerUnreachable(usize),

    #[error("Failed to encode or decode a message: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Run aborted by rank {origin}: {reason}")]
    Aborted { origin: usize, reason: String },
}

/// Empty-cluster condition when the run is configured to fail on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("Cluster {cluster} received no records in iteration {iteration}")]
    EmptyCluster { cluster: usize, iteration: usize },
}

/// Top-level error returned by the training and classification engines.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Comm(#[from] CommError),
}

impl EngineError {
    /// True when this rank learned about the failure from another rank.
    pub fn is_remote_abort(&self) -> bool {
        matches!(self, EngineError::Comm(CommError::Aborted { .. }))
    }
}
