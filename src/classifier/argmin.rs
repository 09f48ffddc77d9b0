use crate::clusterer::euclidean_distance;
use crate::dataset::{FeatureRecord, Label};
use serde::{Deserialize, Serialize};

/// Nearest training record found for a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: Label,
    pub distance: f64,
    /// Id of the winning training record
    pub neighbor: String,
}

/// Linear scan for the record closest to `query`.
///
/// Only a strictly smaller distance replaces the current best, so the first
/// record at the minimum distance wins. Returns `None` for an empty slice.
pub fn nearest_neighbor(records: &[FeatureRecord], query: &[f64]) -> Option<ClassificationResult> {
    let mut best: Option<(usize, f64)> = None;
    for (i, record) in records.iter().enumerate() {
        let d = euclidean_distance(&record.vector, query);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((i, d)),
        }
    }

    best.map(|(i, distance)| ClassificationResult {
        label: records[i].label,
        distance,
        neighbor: records[i].id.clone(),
    })
}

/// Combine two per-rank candidates, `earlier` coming from the lower rank.
///
/// `later` wins only with a strictly smaller distance, so a fold in rank
/// order resolves exact ties to the lowest rank.
pub fn pick_closer(
    earlier: Option<ClassificationResult>,
    later: Option<ClassificationResult>,
) -> Option<ClassificationResult> {
    match (earlier, later) {
        (Some(a), Some(b)) => {
            if b.distance < a.distance {
                Some(b)
            } else {
                Some(a)
            }
        }
        (None, b) => b,
        (a, None) => a,
    }
}
