
use crate::error::ConfigError;
use std::ops::Range;

/// Contiguous block of the global record order owned by one rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub rank: usize,
    pub start: usize,
    pub end: usize,
}

impl Partition {
    /// Partition the record range `[0, records)` over `workers` ranks and
    /// return the block belonging to `rank`.
    ///
    /// Every rank gets `records / workers` records; the last rank also takes
    /// the `records % workers` remainder so that each record is owned exactly
    /// once.
    pub fn for_rank(records: usize, workers: usize, rank: usize) -> Result<Self, ConfigError> {
        if workers == 0 {
            return Err(ConfigError::EmptyWorld);
        }
        if rank >= workers {
            return Err(ConfigError::RankOutOfRange {
                rank,
                size: workers,
            });
        }
        if workers > records {
            return Err(ConfigError::TooManyWorkers { workers, records });
        }

        let block = records / workers;
        let start = rank * block;
        let end = if rank == workers - 1 {
            records
        } else {
            start + block
        };

        Ok(Self { rank, start, end })
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Index range of `rank`'s partition
pub fn partition_range(
    records: usize,
    workers: usize,
    rank: usize,
) -> Result<Range<usize>, ConfigError> {
    Partition::for_rank(records, workers, rank).map(|p| p.range())
}
