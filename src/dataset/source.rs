use super::listing::{fingerprint, list_dataset};
use super::record::{parse_record, FeatureRecord};
use crate::error::{ConfigError, EngineError, RecordError};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Random-access view over the globally ordered record list.
///
/// Every rank holds its own `RecordSource` over the same logical dataset and
/// loads only the indices of its partition.
pub trait RecordSource: Send + Sync {
    /// Total number of records N
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load record `index` of the global ordering
    fn load(&self, index: usize) -> Result<FeatureRecord, RecordError>;

    /// Digest identifying the dataset, compared across ranks before a run
    fn fingerprint(&self) -> String;
}

/// Records stored as one file each under a directory
#[derive(Debug, Clone)]
pub struct FileDataset {
    root: PathBuf,
    paths: Vec<PathBuf>,
    fingerprint: String,
}

impl FileDataset {
    /// Enumerate `root` and fix the global record order
    pub fn open(root: &Path) -> Result<Self, EngineError> {
        let paths = list_dataset(root)?;
        if paths.is_empty() {
            return Err(ConfigError::EmptyDataset(root.to_path_buf()).into());
        }
        let fingerprint = fingerprint(root, &paths);
        Ok(Self {
            root: root.to_path_buf(),
            paths,
            fingerprint,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl RecordSource for FileDataset {
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn load(&self, index: usize) -> Result<FeatureRecord, RecordError> {
        let path = self.paths.get(index).ok_or(RecordError::OutOfRange {
            index,
            len: self.paths.len(),
        })?;
        let source_name = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|e| RecordError::Io {
            source_name: source_name.clone(),
            reason: e.to_string(),
        })?;
        parse_record(&text, &source_name)
    }

    fn fingerprint(&self) -> String {
        self.fingerprint.clone()
    }
}

/// Records already held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryDataset {
    records: Vec<FeatureRecord>,
}

impl MemoryDataset {
    pub fn new(records: Vec<FeatureRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }
}

impl RecordSource for MemoryDataset {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn load(&self, index: usize) -> Result<FeatureRecord, RecordError> {
        self.records
            .get(index)
            .cloned()
            .ok_or(RecordError::OutOfRange {
                index,
                len: self.records.len(),
            })
    }

    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.records.len() as u64).to_le_bytes());
        for record in &self.records {
            hasher.update(record.id.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}
