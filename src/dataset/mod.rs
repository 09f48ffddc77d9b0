mod listing;
mod record;
mod source;


pub use listing::{fingerprint, list_dataset};
pub use record::{parse_record, read_record, FeatureRecord, Label};
pub use source::{FileDataset, MemoryDataset, RecordSource};
