use crate::error::RecordError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Integer class label attached to a training record
pub type Label = i64;

/// One labelled feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Record identifier (e.g. the image id)
    pub id: String,
    /// Class label
    pub label: Label,
    /// Declared vector length
    pub dimension: usize,
    /// Feature values, `dimension` long
    pub vector: Vec<f64>,
}

impl FeatureRecord {
    /// Build a record whose declared dimension is the vector length
    pub fn new(id: impl Into<String>, label: Label, vector: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            label,
            dimension: vector.len(),
            vector,
        }
    }

    /// Check the record against the configured run dimension
    pub fn check_dimension(&self, expected: usize) -> Result<(), RecordError> {
        if self.dimension != expected || self.vector.len() != expected {
            return Err(RecordError::DimensionMismatch {
                source_name: self.id.clone(),
                declared: self.dimension,
                expected,
            });
        }
        Ok(())
    }
}

/// Parse the two-line record format:
///
/// ```text
/// <id> <label> <dimension>
/// <v0> <v1> ... <v(dimension-1)>
/// ```
///
/// `source_name` only appears in error messages.
pub fn parse_record(text: &str, source_name: &str) -> Result<FeatureRecord, RecordError> {
    let malformed = |line: usize, reason: String| RecordError::Malformed {
        source_name: source_name.to_string(),
        line,
        reason,
    };

    let mut lines = text.lines();

    let header = lines
        .next()
        .ok_or_else(|| malformed(1, "missing header line".to_string()))?;
    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(malformed(
            1,
            format!("expected `id label dimension`, found {} fields", fields.len()),
        ));
    }

    let id = fields[0].to_string();
    let label: Label = fields[1]
        .parse()
        .map_err(|_| malformed(1, format!("label `{}` is not an integer", fields[1])))?;
    let dimension: usize = fields[2]
        .parse()
        .map_err(|_| malformed(1, format!("dimension `{}` is not an integer", fields[2])))?;
    if dimension == 0 {
        return Err(malformed(1, "dimension must be at least 1".to_string()));
    }

    let values = lines
        .next()
        .ok_or_else(|| malformed(2, "missing feature vector line".to_string()))?;

    let mut vector = Vec::with_capacity(dimension);
    for (i, token) in values.split_whitespace().enumerate() {
        let value: f64 = token
            .parse()
            .map_err(|_| malformed(2, format!("value {} (`{}`) is not a number", i, token)))?;
        if !value.is_finite() {
            return Err(malformed(2, format!("value {} is not finite", i)));
        }
        vector.push(value);
    }
    if vector.len() != dimension {
        return Err(malformed(
            2,
            format!("header declares {} values, found {}", dimension, vector.len()),
        ));
    }

    if let Some((offset, _)) = lines.enumerate().find(|(_, l)| !l.trim().is_empty()) {
        return Err(malformed(3 + offset, "unexpected trailing content".to_string()));
    }

    Ok(FeatureRecord {
        id,
        label,
        dimension,
        vector,
    })
}

/// Read and parse a record file, enforcing the configured dimension
pub fn read_record(path: &Path, expected_dim: usize) -> Result<FeatureRecord, RecordError> {
    let source_name = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|e| RecordError::Io {
        source_name: source_name.clone(),
        reason: e.to_string(),
    })?;

    let record = parse_record(&text, &source_name)?;
    if record.dimension != expected_dim {
        return Err(RecordError::DimensionMismatch {
            source_name,
            declared: record.dimension,
            expected: expected_dim,
        });
    }
    Ok(record)
}
