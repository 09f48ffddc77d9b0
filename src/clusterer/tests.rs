use super::*;
use crate::comm::{Communicator, LocalWorld};
use crate::config::{EmptyClusterPolicy, InitStrategy, RunConfig};
use crate::dataset::{FeatureRecord, MemoryDataset};
use crate::error::{ClusterError, CommError, ConfigError, EngineError, RecordError};

const EPS: f64 = 1e-9;

/// Three well separated 2-d blobs, interleaved so that the first three
/// records come from three different blobs.
fn blobs(per_blob: usize) -> Vec<FeatureRecord> {
    let centers = [[0.0, 0.0], [10.0, 10.0], [-10.0, 10.0]];
    let mut records = Vec::new();
    for i in 0..per_blob {
        for (b, c) in centers.iter().enumerate() {
            let jx = ((i * 7 + b * 3) % 11) as f64 / 10.0 - 0.5;
            let jy = ((i * 5 + b) % 13) as f64 / 12.0 - 0.5;
            records.push(FeatureRecord::new(
                format!("b{}_{}", b, i),
                b as i64,
                vec![c[0] + jx, c[1] + jy],
            ));
        }
    }
    records
}

fn train_world(
    size: usize,
    records: &[FeatureRecord],
    config: &RunConfig,
) -> Vec<Result<TrainOutcome, EngineError>> {
    let dataset = MemoryDataset::new(records.to_vec());
    let engine = DistributedKMeans::new(config.clone()).unwrap();
    LocalWorld::run(size, |mut comm| engine.run(&mut comm, &dataset)).unwrap()
}

fn assert_close(a: &CentroidSet, b: &CentroidSet) {
    assert_eq!((a.k(), a.dim()), (b.k(), b.dim()));
    for (x, y) in a.iter().zip(b.iter()) {
        for (u, v) in x.iter().zip(y) {
            assert!((u - v).abs() < EPS, "{} vs {}", u, v);
        }
    }
}

// ========================================================================
// CentroidSet
// ========================================================================

#[test]
fn test_centroid_set_rows() {
    let set = CentroidSet::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
    assert_eq!(set.k(), 2);
    assert_eq!(set.dim(), 2);
    assert_eq!(set.centroid(1), &[3.0, 4.0]);
    assert_eq!(set.to_rows(), vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    assert!(set.check_shape(2, 2).is_ok());
    assert!(set.check_shape(3, 2).is_err());
}

#[test]
fn test_centroid_set_rejects_ragged_rows() {
    assert!(matches!(
        CentroidSet::from_rows(vec![vec![1.0, 2.0], vec![3.0]]),
        Err(ConfigError::ShapeMismatch { .. })
    ));
    assert_eq!(CentroidSet::from_rows(vec![]), Err(ConfigError::ZeroClusters));
    assert_eq!(
        CentroidSet::from_rows(vec![vec![]]),
        Err(ConfigError::ZeroDimension)
    );
}

#[test]
fn test_nearest_breaks_ties_by_lowest_index() {
    let set = CentroidSet::from_rows(vec![vec![-1.0], vec![1.0], vec![1.0]]).unwrap();
    assert_eq!(set.nearest(&[0.0]).0, 0);
    assert_eq!(set.nearest(&[2.0]).0, 1);
    assert_eq!(set.nearest(&[0.9]).0, 1);
}

#[test]
fn test_max_displacement() {
    let old = CentroidSet::from_rows(vec![vec![0.0, 0.0], vec![1.0, 1.0]]).unwrap();
    let new = CentroidSet::from_rows(vec![vec![3.0, 4.0], vec![1.0, 2.0]]).unwrap();
    assert_eq!(new.max_displacement(&old), 5.0);
    assert_eq!(old.max_displacement(&old), 0.0);
}

// ========================================================================
// Local assignment
// ========================================================================

#[test]
fn test_assign_partition_sums_and_counts() {
    let centroids = CentroidSet::from_rows(vec![vec![0.0, 0.0], vec![10.0, 10.0]]).unwrap();
    let records = vec![
        FeatureRecord::new("a", 0, vec![1.0, 0.0]),
        FeatureRecord::new("b", 0, vec![0.0, 1.0]),
        FeatureRecord::new("c", 1, vec![9.0, 9.0]),
    ];

    let acc = assign_partition(&centroids, &records);
    assert_eq!(acc.counts(), &[2, 1]);
    assert_eq!(acc.sum(0), &[1.0, 1.0]);
    assert_eq!(acc.sum(1), &[9.0, 9.0]);
    assert_eq!(acc.total(), 3);
}

#[test]
fn test_assign_tie_goes_to_first_cluster() {
    let centroids = CentroidSet::from_rows(vec![vec![-1.0], vec![1.0]]).unwrap();
    let mut acc = PartialAccumulator::new(2, 1);
    assert_eq!(acc.assign(&centroids, &[0.0]), 0);
    assert_eq!(acc.counts(), &[1, 0]);
}

#[test]
fn test_merge_adds_sums_and_counts() {
    let mut a = PartialAccumulator::new(2, 2);
    a.add(0, &[1.0, 2.0]);
    let mut b = PartialAccumulator::new(2, 2);
    b.add(0, &[3.0, 4.0]);
    b.add(1, &[5.0, 6.0]);

    let merged = a.merge(b);
    assert_eq!(merged.counts(), &[2, 1]);
    assert_eq!(merged.sum(0), &[4.0, 6.0]);
    assert_eq!(merged.sum(1), &[5.0, 6.0]);
}

// ========================================================================
// Aggregation
// ========================================================================

#[test]
fn test_aggregate_computes_means() {
    let previous = CentroidSet::from_rows(vec![vec![0.0], vec![10.0]]).unwrap();
    let mut total = PartialAccumulator::new(2, 1);
    total.add(0, &[1.0]);
    total.add(0, &[3.0]);
    total.add(1, &[8.0]);

    let config = RunConfig::new(2, 1);
    let decision = aggregate(&previous, &total, 1, &config).unwrap();
    assert_eq!(decision.centroids.to_rows(), vec![vec![2.0], vec![8.0]]);
    assert_eq!(decision.state.max_displacement, 2.0);
    assert!(decision.state.should_continue);
    assert_eq!(decision.cluster_sizes, vec![2, 1]);
    assert!(decision.empty_clusters.is_empty());
}

#[test]
fn test_aggregate_empty_cluster_retains_previous() {
    let previous = CentroidSet::from_rows(vec![vec![0.0], vec![10.0]]).unwrap();
    let mut total = PartialAccumulator::new(2, 1);
    total.add(0, &[1.0]);

    let config = RunConfig::new(2, 1);
    let decision = aggregate(&previous, &total, 4, &config).unwrap();
    assert_eq!(decision.centroids.centroid(1), &[10.0]);
    assert!(decision.centroids.centroid(1)[0].is_finite());
    assert_eq!(decision.empty_clusters, vec![1]);
    assert_eq!(decision.state.max_displacement, 1.0);
}

#[test]
fn test_aggregate_empty_cluster_fails_when_configured() {
    let previous = CentroidSet::from_rows(vec![vec![0.0], vec![10.0]]).unwrap();
    let mut total = PartialAccumulator::new(2, 1);
    total.add(1, &[9.0]);

    let config = RunConfig::new(2, 1).with_empty_cluster(EmptyClusterPolicy::Fail);
    assert_eq!(
        aggregate(&previous, &total, 3, &config),
        Err(ClusterError::EmptyCluster {
            cluster: 0,
            iteration: 3
        })
    );
}

#[test]
fn test_should_continue() {
    let config = RunConfig::new(2, 1)
        .with_threshold(0.5)
        .with_max_iterations(3);
    assert!(should_continue(0.5, 1, &config));
    assert!(!should_continue(0.49, 1, &config));
    assert!(!should_continue(100.0, 3, &config));
    assert!(should_continue(100.0, 2, &config));
}

// ========================================================================
// Initialisation
// ========================================================================

#[test]
fn test_initial_indices() {
    let config = RunConfig::new(3, 2);
    assert_eq!(initial_indices(10, &config).unwrap(), vec![0, 1, 2]);

    let random = config.clone().with_init(InitStrategy::Random).with_seed(7);
    let a = initial_indices(100, &random).unwrap();
    let b = initial_indices(100, &random).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 3);
    assert!(a.iter().all(|&i| i < 100));
    let mut unique = a.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 3);

    assert_eq!(
        initial_indices(2, &config),
        Err(ConfigError::TooManyClusters { k: 3, records: 2 })
    );
}

#[test]
fn test_initial_centroids_check_dimension() {
    let dataset = MemoryDataset::new(vec![
        FeatureRecord::new("a", 0, vec![0.0, 0.0]),
        FeatureRecord::new("b", 0, vec![1.0]),
    ]);
    let err = initial_centroids(&dataset, &RunConfig::new(2, 2)).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Record(RecordError::DimensionMismatch { .. })
    ));
}

// ========================================================================
// Distributed runs
// ========================================================================

#[test]
fn test_two_point_fixed_point() {
    let records = vec![
        FeatureRecord::new("origin", 0, vec![0.0, 0.0, 0.0]),
        FeatureRecord::new("far", 1, vec![10.0, 10.0, 10.0]),
    ];
    let config = RunConfig::new(2, 3);

    for size in 1..=2 {
        for outcome in train_world(size, &records, &config) {
            let outcome = outcome.unwrap();
            assert_eq!(outcome.iterations, 1);
            assert!(outcome.converged);
            assert!(!outcome.history[0].should_continue);
            assert_eq!(outcome.history[0].max_displacement, 0.0);
            assert_eq!(
                outcome.centroids.to_rows(),
                vec![vec![0.0, 0.0, 0.0], vec![10.0, 10.0, 10.0]]
            );
            assert_eq!(outcome.cluster_sizes, vec![1, 1]);

            // A query near the origin lands in the label-0 cluster.
            assert_eq!(outcome.centroids.nearest(&[1.0, 1.0, 1.0]).0, 0);
        }
    }
}

#[test]
fn test_every_rank_ends_with_identical_centroids() {
    let records = blobs(9);
    let config = RunConfig::new(3, 2);
    let outcomes: Vec<TrainOutcome> = train_world(4, &records, &config)
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    for outcome in &outcomes[1..] {
        assert_eq!(outcome.centroids, outcomes[0].centroids);
        assert_eq!(outcome.run_id, outcomes[0].run_id);
        assert_eq!(outcome.history, outcomes[0].history);
    }
    assert_eq!(outcomes[0].records, 27);
    assert_eq!(outcomes[0].world_size, 4);
}

#[test]
fn test_one_iteration_is_independent_of_world_size() {
    let records = blobs(10);
    let config = RunConfig::new(3, 2).with_max_iterations(1);

    let reference = train_world(1, &records, &config).remove(0).unwrap();
    assert_eq!(reference.iterations, 1);

    for size in 2..=7 {
        let outcome = train_world(size, &records, &config).remove(0).unwrap();
        assert_eq!(outcome.iterations, 1);
        assert_close(&outcome.centroids, &reference.centroids);
        assert_eq!(outcome.cluster_sizes, reference.cluster_sizes);
    }
}

#[test]
fn test_converges_on_separated_blobs() {
    let records = blobs(12);
    let config = RunConfig::new(3, 2);

    let outcome = train_world(3, &records, &config).remove(0).unwrap();
    assert!(outcome.converged);
    assert!(outcome.iterations <= config.max_iterations);
    assert_eq!(outcome.cluster_sizes, vec![12, 12, 12]);

    // Displacement does not grow on this fixture.
    for pair in outcome.history.windows(2) {
        assert!(pair[1].max_displacement <= pair[0].max_displacement);
    }

    // Each centroid sits near its blob's centre.
    let expected = [[0.0, 0.0], [10.0, 10.0], [-10.0, 10.0]];
    for (centroid, center) in outcome.centroids.iter().zip(expected.iter()) {
        assert!(euclidean_distance(centroid, center) < 0.5);
    }
}

#[test]
fn test_converged_centroids_are_a_fixed_point() {
    let records = blobs(8);
    let config = RunConfig::new(3, 2);
    let outcome = train_world(2, &records, &config).remove(0).unwrap();
    assert!(outcome.converged);

    let total = assign_partition(&outcome.centroids, &records);
    let decision = aggregate(&outcome.centroids, &total, 1, &config).unwrap();
    assert!(decision.state.max_displacement < config.threshold);
    assert!(!decision.state.should_continue);
}

#[test]
fn test_iteration_cap_stops_the_run() {
    let records = blobs(6);
    let config = RunConfig::new(2, 2)
        .with_threshold(0.0)
        .with_max_iterations(2);
    let outcome = train_world(2, &records, &config).remove(0).unwrap();
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.history.len(), 2);
    assert!(!outcome.history[1].should_continue);
}

#[test]
fn test_empty_cluster_retained_in_distributed_run() {
    let records = vec![
        FeatureRecord::new("a", 0, vec![0.0, 0.0]),
        FeatureRecord::new("b", 0, vec![0.0, 0.0]),
        FeatureRecord::new("c", 1, vec![4.0, 4.0]),
        FeatureRecord::new("d", 1, vec![2.0, 2.0]),
    ];
    let config = RunConfig::new(2, 2).with_max_iterations(1);

    let outcome = train_world(2, &records, &config).remove(0).unwrap();
    // Both seeds coincide, so every record goes to cluster 0 and cluster 1
    // keeps its seed.
    assert_eq!(outcome.cluster_sizes, vec![4, 0]);
    assert_eq!(outcome.centroids.centroid(0), &[1.5, 1.5]);
    assert_eq!(outcome.centroids.centroid(1), &[0.0, 0.0]);
    assert!(outcome
        .centroids
        .iter()
        .all(|c| c.iter().all(|v| v.is_finite())));
}

#[test]
fn test_retained_cluster_recovers_later() {
    let records = vec![
        FeatureRecord::new("a", 0, vec![0.0, 0.0]),
        FeatureRecord::new("b", 0, vec![0.0, 0.0]),
        FeatureRecord::new("c", 1, vec![4.0, 4.0]),
        FeatureRecord::new("d", 1, vec![2.0, 2.0]),
    ];
    let config = RunConfig::new(2, 2);

    let outcome = train_world(2, &records, &config).remove(0).unwrap();
    assert!(outcome.converged);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.centroids.to_rows(), vec![vec![3.0, 3.0], vec![0.0, 0.0]]);
    assert_eq!(outcome.cluster_sizes, vec![2, 2]);
}

#[test]
fn test_empty_cluster_fail_policy_aborts_every_rank() {
    let records = vec![
        FeatureRecord::new("a", 0, vec![0.0]),
        FeatureRecord::new("b", 0, vec![0.0]),
        FeatureRecord::new("c", 1, vec![4.0]),
    ];
    let config = RunConfig::new(2, 1).with_empty_cluster(EmptyClusterPolicy::Fail);

    let results = train_world(3, &records, &config);
    assert!(matches!(
        results[0],
        Err(EngineError::Cluster(ClusterError::EmptyCluster {
            cluster: 1,
            iteration: 1
        }))
    ));
    for result in &results[1..] {
        match result {
            Err(EngineError::Comm(CommError::Aborted { origin, reason })) => {
                assert_eq!(*origin, 0);
                assert!(reason.contains("Cluster 1"));
            }
            other => panic!("expected abort, got {:?}", other),
        }
    }
}

#[test]
fn test_bad_record_in_worker_partition_aborts_run() {
    let mut records = blobs(4);
    records[10] = FeatureRecord::new("short", 0, vec![1.0]);
    let config = RunConfig::new(3, 2);

    // 12 records over 3 ranks: index 10 belongs to rank 2.
    let results = train_world(3, &records, &config);
    assert!(matches!(
        results[2],
        Err(EngineError::Record(RecordError::DimensionMismatch { .. }))
    ));
    for rank in [0, 1] {
        assert!(
            matches!(
                &results[rank],
                Err(EngineError::Comm(CommError::Aborted { origin: 2, .. }))
            ),
            "rank {}: {:?}",
            rank,
            results[rank]
        );
    }
}

#[test]
fn test_more_ranks_than_records_is_a_config_error() {
    let records = blobs(1);
    let config = RunConfig::new(1, 2);
    let results = train_world(4, &records, &config);
    assert!(matches!(
        results[0],
        Err(EngineError::Config(ConfigError::TooManyWorkers {
            workers: 4,
            records: 3
        }))
    ));
    assert!(results[1..]
        .iter()
        .all(|r| r.as_ref().unwrap_err().is_remote_abort()));
}

#[test]
fn test_ranks_with_different_datasets_refuse_to_run() {
    let records = blobs(2);
    let engine = DistributedKMeans::new(RunConfig::new(2, 2)).unwrap();
    let full = MemoryDataset::new(records.clone());
    let partial = MemoryDataset::new(records[..5].to_vec());

    let results = LocalWorld::run(2, |mut comm| {
        if comm.rank() == 1 {
            engine.run(&mut comm, &partial)
        } else {
            engine.run(&mut comm, &full)
        }
    })
    .unwrap();

    assert!(matches!(
        results[0],
        Err(EngineError::Config(ConfigError::DatasetMismatch { rank: 1, .. }))
    ));
    assert!(results[1].as_ref().unwrap_err().is_remote_abort());
}

#[test]
fn test_invalid_config_is_rejected_up_front() {
    assert!(DistributedKMeans::new(RunConfig::new(0, 2)).is_err());
    assert!(DistributedKMeans::new(RunConfig::new(2, 2).with_max_iterations(0)).is_err());
}
