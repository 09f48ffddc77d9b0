use crate::comm::{broadcast, gather, Communicator};
use crate::dataset::{FeatureRecord, RecordSource};
use crate::error::{CommError, ConfigError, EngineError};
use crate::partition::Partition;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// What every rank reports before a run starts
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Inventory {
    records: usize,
    fingerprint: String,
}

/// Facts agreed on by all ranks at the start of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub run_id: Uuid,
    pub world_size: usize,
    /// Total record count N
    pub records: usize,
    pub fingerprint: String,
}

/// Check that every rank sees the same dataset, then hand out partitions.
///
/// Fails collectively when ranks enumerated different datasets or when the
/// world is larger than the dataset.
pub fn establish<C, S>(comm: &mut C, source: &S) -> Result<(Session, Partition), EngineError>
where
    C: Communicator + ?Sized,
    S: RecordSource + ?Sized,
{
    let inventory = Inventory {
        records: source.len(),
        fingerprint: source.fingerprint(),
    };
    let world_size = comm.size();

    let reports = gather(comm, Ok(inventory))?;

    let session = broadcast(comm, || {
        let reports = reports.ok_or_else(|| {
            CommError::Protocol("coordinator gathered no inventories".to_string())
        })?;
        let expected = &reports[0];
        for (rank, report) in reports.iter().enumerate().skip(1) {
            if report.fingerprint != expected.fingerprint || report.records != expected.records {
                return Err(ConfigError::DatasetMismatch {
                    rank,
                    fingerprint: report.fingerprint.clone(),
                    expected: expected.fingerprint.clone(),
                }
                .into());
            }
        }
        if world_size > expected.records {
            return Err(ConfigError::TooManyWorkers {
                workers: world_size,
                records: expected.records,
            }
            .into());
        }

        Ok(Session {
            run_id: Uuid::new_v4(),
            world_size,
            records: expected.records,
            fingerprint: expected.fingerprint.clone(),
        })
    })?;

    let partition = Partition::for_rank(session.records, session.world_size, comm.rank())?;
    info!(
        rank = comm.rank(),
        run_id = %session.run_id,
        start = partition.start,
        end = partition.end,
        "partition assigned"
    );
    Ok((session, partition))
}

/// Load and validate every record of `partition`
pub fn load_partition<S: RecordSource + ?Sized>(
    source: &S,
    partition: &Partition,
    dimension: usize,
) -> Result<Vec<FeatureRecord>, EngineError> {
    let mut records = Vec::with_capacity(partition.len());
    for index in partition.range() {
        let record = source.load(index)?;
        record.check_dimension(dimension)?;
        records.push(record);
    }
    debug!(rank = partition.rank, loaded = records.len(), "partition loaded");
    Ok(records)
}

/// Load the local partition and make sure every other rank managed to as well.
///
/// A rank that cannot read one of its records aborts the run for everyone.
/// Returns only once the coordinator has confirmed that every rank loaded.
pub fn load_and_confirm<C, S>(
    comm: &mut C,
    source: &S,
    partition: &Partition,
    dimension: usize,
) -> Result<Vec<FeatureRecord>, EngineError>
where
    C: Communicator + ?Sized,
    S: RecordSource + ?Sized,
{
    let (records, status) = match load_partition(source, partition, dimension) {
        Ok(records) => {
            let n = records.len();
            (records, Ok(n))
        }
        Err(err) => (Vec::new(), Err(err)),
    };

    let gathered = gather(comm, status)?;
    let loaded: Vec<usize> = broadcast(comm, || {
        gathered.ok_or_else(|| {
            CommError::Protocol("coordinator gathered no load reports".to_string()).into()
        })
    })?;
    info!(rank = comm.rank(), per_rank = ?loaded, "all partitions loaded");
    Ok(records)
}
