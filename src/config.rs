use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default convergence threshold on the maximum centroid displacement
pub const DEFAULT_THRESHOLD: f64 = 1e-8;

/// Default iteration cap
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Default seed for `InitStrategy::Random`
pub const DEFAULT_SEED: u64 = 42;

/// How the coordinator picks the starting centroids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStrategy {
    /// The first K records of the global ordering
    #[default]
    First,
    /// K distinct records drawn with a seeded ChaCha8 generator
    Random,
}

/// What the aggregator does when a cluster receives no records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyClusterPolicy {
    /// Keep the previous centroid unchanged
    #[default]
    RetainPrevious,
    /// Abort the run with `ClusterError::EmptyCluster`
    Fail,
}

/// Parameters shared by every rank of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub k: usize,
    pub dimension: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub init: InitStrategy,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub empty_cluster: EmptyClusterPolicy,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

impl RunConfig {
    /// Create a config for `k` clusters of `dimension`-long vectors with default limits
    pub fn new(k: usize, dimension: usize) -> Self {
        Self {
            k,
            dimension,
            threshold: DEFAULT_THRESHOLD,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            init: InitStrategy::default(),
            seed: DEFAULT_SEED,
            empty_cluster: EmptyClusterPolicy::default(),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_init(mut self, init: InitStrategy) -> Self {
        self.init = init;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_empty_cluster(mut self, policy: EmptyClusterPolicy) -> Self {
        self.empty_cluster = policy;
        self
    }

    /// Load a config from a JSON file. Missing optional fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: RunConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::InvalidFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameters the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k == 0 {
            return Err(ConfigError::ZeroClusters);
        }
        if self.dimension == 0 {
            return Err(ConfigError::ZeroDimension);
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        Ok(())
    }
}

/// Default time a rank waits for the rest of the world to connect
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where this process sits in the process group
#[derive(Debug, Clone, PartialEq)]
pub struct WorldConfig {
    pub rank: usize,
    pub size: usize,
    /// Address the coordinator (rank 0) listens on
    pub coordinator: SocketAddr,
    pub connect_timeout: Duration,
    /// Shared secret that keeps workers of different runs apart
    pub token: String,
}

impl WorldConfig {
    pub fn new(rank: usize, size: usize, coordinator: SocketAddr) -> Self {
        Self {
            rank,
            size,
            coordinator,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            token: String::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 {
            return Err(ConfigError::EmptyWorld);
        }
        if self.rank >= self.size {
            return Err(ConfigError::RankOutOfRange {
                rank: self.rank,
                size: self.size,
            });
        }
        Ok(())
    }
}
