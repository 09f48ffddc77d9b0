//! Distributed nearest-neighbor classification.
//!
//! The training set is partitioned exactly as for training. For each query
//! every rank scans its partition, the per-rank winners are reduced on the
//! coordinator with [`pick_closer`] and the overall winner is broadcast back.

mod argmin;


pub use argmin::{nearest_neighbor, pick_closer, ClassificationResult};

use crate::comm::{broadcast, reduce, Communicator};
use crate::dataset::{read_record, FeatureRecord, RecordSource};
use crate::error::{CommError, EngineError};
use crate::partition::Partition;
use crate::session::{establish, load_and_confirm, Session};
use std::path::Path;
use tracing::{debug, info};

/// A rank's share of the training set, loaded once and queried many times
#[derive(Debug)]
pub struct Classifier {
    session: Session,
    partition: Partition,
    records: Vec<FeatureRecord>,
    dimension: usize,
}

impl Classifier {
    /// Agree on the dataset with the other ranks and load the local partition.
    ///
    /// Collective: every rank of the run must call it.
    pub fn prepare<C, S>(comm: &mut C, source: &S, dimension: usize) -> Result<Self, EngineError>
    where
        C: Communicator + ?Sized,
        S: RecordSource + ?Sized,
    {
        let (session, partition) = establish(comm, source)?;
        let records = load_and_confirm(comm, source, &partition, dimension)?;
        info!(
            rank = comm.rank(),
            run_id = %session.run_id,
            records = records.len(),
            "classifier ready"
        );
        Ok(Self {
            session,
            partition,
            records,
            dimension,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    /// Classify one query against the whole training set.
    ///
    /// Collective: every rank must call it with the same query, and every
    /// rank gets the same result back.
    pub fn classify<C>(&self, comm: &mut C, query: &FeatureRecord) -> Result<ClassificationResult, EngineError>
    where
        C: Communicator + ?Sized,
    {
        self.search(comm, Ok(query))
    }

    /// Read the query record at `path` on every rank, then classify it.
    ///
    /// A rank that cannot read or validate the query aborts the run for all.
    pub fn classify_file<C>(
        &self,
        comm: &mut C,
        path: &Path,
    ) -> Result<(FeatureRecord, ClassificationResult), EngineError>
    where
        C: Communicator + ?Sized,
    {
        let query = read_record(path, self.dimension);
        let result = self.search(comm, query.as_ref().map_err(|e| e.clone().into()))?;
        Ok((query?, result))
    }

    fn search<C>(&self, comm: &mut C, query: Result<&FeatureRecord, EngineError>) -> Result<ClassificationResult, EngineError>
    where
        C: Communicator + ?Sized,
    {
        let local = query.and_then(|query| {
            query.check_dimension(self.dimension)?;
            let candidate = nearest_neighbor(&self.records, &query.vector);
            if let Some(candidate) = &candidate {
                debug!(
                    rank = comm.rank(),
                    query = %query.id,
                    distance = candidate.distance,
                    "local nearest neighbor"
                );
            }
            Ok(candidate)
        });

        let best = reduce(comm, local, pick_closer)?;

        broadcast(comm, || {
            best.flatten().ok_or_else(|| {
                CommError::Protocol("no rank produced a nearest-neighbor candidate".to_string()).into()
            })
        })
    }
}
