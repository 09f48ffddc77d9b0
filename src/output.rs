use crate::clusterer::{CentroidSet, TrainOutcome};
use crate::config::RunConfig;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write one line per centroid, each value as `{:.6}` followed by a space
pub fn write_centroids(path: &Path, centroids: &CentroidSet) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create centroid file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_centroid_lines(&mut out, centroids)?;
    out.flush()
        .with_context(|| format!("Failed to write centroid file {}", path.display()))?;
    Ok(())
}

fn write_centroid_lines<W: Write>(out: &mut W, centroids: &CentroidSet) -> Result<()> {
    for centroid in centroids.iter() {
        for value in centroid {
            write!(out, "{:.6} ", value)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Read a centroid file written by [`write_centroids`], checking its shape
pub fn read_centroids(path: &Path, k: usize, dim: usize) -> Result<CentroidSet> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read centroid file {}", path.display()))?;

    let mut rows = Vec::with_capacity(k);
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("{}:{}: invalid centroid value", path.display(), n + 1))?;
        rows.push(row);
    }

    if rows.len() != k {
        bail!(
            "{} holds {} centroids, expected {}",
            path.display(),
            rows.len(),
            k
        );
    }
    let centroids = CentroidSet::from_rows(rows)
        .with_context(|| format!("Invalid centroid file {}", path.display()))?;
    centroids.check_shape(k, dim)?;
    Ok(centroids)
}

/// Summary of a training run, written as JSON next to the centroid file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub created_at: String,
    pub generator: String,
    pub world_size: usize,
    pub records: usize,
    pub dataset_fingerprint: String,
    pub config: RunConfig,
    pub iterations: usize,
    pub converged: bool,
    pub final_displacement: f64,
    /// Maximum displacement after each iteration
    pub displacements: Vec<f64>,
    pub cluster_sizes: Vec<u64>,
    pub centroids: Vec<Vec<f64>>,
}

impl RunReport {
    pub fn new(config: &RunConfig, outcome: &TrainOutcome) -> Self {
        Self {
            run_id: outcome.run_id.to_string(),
            created_at: Utc::now().to_rfc3339(),
            generator: format!("lloyd-mesh v{}", env!("CARGO_PKG_VERSION")),
            world_size: outcome.world_size,
            records: outcome.records,
            dataset_fingerprint: outcome.fingerprint.clone(),
            config: config.clone(),
            iterations: outcome.iterations,
            converged: outcome.converged,
            final_displacement: outcome.final_displacement(),
            displacements: outcome.history.iter().map(|s| s.max_displacement).collect(),
            cluster_sizes: outcome.cluster_sizes.clone(),
            centroids: outcome.centroids.to_rows(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write run report {}", path.display()))?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run report {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse run report {}", path.display()))
    }
}
