use crate::clusterer::{
    accumulator::{assign_partition, PartialAccumulator},
    aggregate::{aggregate, Decision},
    init::initial_centroids,
    types::TrainOutcome,
};
use crate::comm::{broadcast, reduce, Communicator};
use crate::config::RunConfig;
use crate::dataset::RecordSource;
use crate::error::{CommError, ConfigError, EngineError};
use crate::session::{establish, load_and_confirm};
use tracing::{debug, info, info_span};

/// Lloyd's k-means over a dataset partitioned across the ranks of a run.
///
/// Every rank calls [`DistributedKMeans::run`] with the same config and its
/// own view of the dataset. Each iteration:
///
/// 1. every rank assigns its partition to the current centroids
/// 2. partial sums and counts are reduced on the coordinator in rank order
/// 3. the coordinator computes new centroids, the displacement and whether to go on
/// 4. that decision and the new centroids are broadcast back
///
/// No rank starts iteration `t + 1` before it has received iteration `t`'s
/// broadcast.
pub struct DistributedKMeans {
    config: RunConfig,
}

impl DistributedKMeans {
    pub fn new(config: RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run<C, S>(&self, comm: &mut C, source: &S) -> Result<TrainOutcome, EngineError>
    where
        C: Communicator + ?Sized,
        S: RecordSource + ?Sized,
    {
        let rank = comm.rank();
        let config = &self.config;

        let (session, partition) = establish(comm, source)?;
        let span = info_span!("train", rank, run_id = %session.run_id);
        let _guard = span.enter();

        let records = load_and_confirm(comm, source, &partition, config.dimension)?;

        let mut centroids = broadcast(comm, || initial_centroids(source, config))?;
        centroids.check_shape(config.k, config.dimension)?;
        info!(k = config.k, dimension = config.dimension, "initial centroids received");

        let mut history = Vec::new();
        let mut iteration = 0;

        let last = loop {
            iteration += 1;

            let local = assign_partition(&centroids, &records);
            debug!(iteration, assigned = local.total(), "local assignment done");

            let total = reduce(comm, Ok(local), PartialAccumulator::merge)?;

            let decision: Decision = broadcast(comm, || {
                let total = total.ok_or_else(|| {
                    CommError::Protocol("coordinator reduced no accumulators".to_string())
                })?;
                Ok(aggregate(&centroids, &total, iteration, config)?)
            })?;

            if comm.is_root() {
                info!(
                    iteration,
                    displacement = decision.state.max_displacement,
                    empty = decision.empty_clusters.len(),
                    "iteration complete"
                );
            }

            history.push(decision.state);
            if !decision.state.should_continue {
                break decision;
            }
            centroids = decision.centroids;
        };

        let converged = history
            .last()
            .map(|s| s.max_displacement < config.threshold)
            .unwrap_or(false);
        info!(iterations = iteration, converged, "training finished");

        Ok(TrainOutcome {
            run_id: session.run_id,
            centroids: last.centroids,
            iterations: iteration,
            converged,
            history,
            cluster_sizes: last.cluster_sizes,
            records: session.records,
            world_size: session.world_size,
            fingerprint: session.fingerprint,
        })
    }
}
