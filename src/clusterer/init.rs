use super::centroid::CentroidSet;
use crate::config::{InitStrategy, RunConfig};
use crate::dataset::RecordSource;
use crate::error::{ConfigError, EngineError};
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Global record indices whose vectors seed the centroids
pub fn initial_indices(records: usize, config: &RunConfig) -> Result<Vec<usize>, ConfigError> {
    if config.k > records {
        return Err(ConfigError::TooManyClusters {
            k: config.k,
            records,
        });
    }

    Ok(match config.init {
        InitStrategy::First => (0..config.k).collect(),
        InitStrategy::Random => {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
            let all: Vec<usize> = (0..records).collect();
            all.choose_multiple(&mut rng, config.k).copied().collect()
        }
    })
}

/// Load the seed records and build the starting centroid set.
///
/// Runs on the coordinator only; the result is broadcast.
pub fn initial_centroids<S: RecordSource + ?Sized>(
    source: &S,
    config: &RunConfig,
) -> Result<CentroidSet, EngineError> {
    let indices = initial_indices(source.len(), config)?;

    let mut rows = Vec::with_capacity(indices.len());
    for index in indices {
        let record = source.load(index)?;
        record.check_dimension(config.dimension)?;
        rows.push(record.vector);
    }

    let centroids = CentroidSet::from_rows(rows)?;
    centroids.check_shape(config.k, config.dimension)?;
    Ok(centroids)
}
