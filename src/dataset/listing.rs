use crate::error::RecordError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Enumerate every record file under `dir`, sorted by path.
///
/// Hidden files and directories are skipped. The order is the global record
/// order every rank partitions against, so it must not depend on the
/// filesystem's directory iteration order.
pub fn list_dataset(dir: &Path) -> Result<Vec<PathBuf>, RecordError> {
    let mut paths = Vec::new();

    let walker = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|e| RecordError::Io {
            source_name: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file() {
            paths.push(entry.into_path());
        }
    }

    paths.sort();
    Ok(paths)
}

/// SHA-256 over the ordered path list, relative to `root`.
///
/// Two ranks that enumerated the same dataset get the same digest even when
/// they mount it at different absolute locations.
pub fn fingerprint(root: &Path, paths: &[PathBuf]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((paths.len() as u64).to_le_bytes());
    for path in paths {
        let relative = path.strip_prefix(root).unwrap_or(path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
