//! Reader for STAR `ReadsPerGene.out.tab` files

use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::config::CountColumn;
use crate::data::CountMatrix;
use crate::error::{PipelineError, Result};

const END_OF_FILE: &str = "<end of file>";

/// Gene ids and one count column from a single STAR file
#[derive(Debug, Clone)]
pub struct StarCounts {
    pub gene_ids: Vec<String>,
    pub counts: Vec<f64>,
}

/// Read one STAR count file.
///
/// The file has four tab-separated columns (gene id, unstranded, strand 1,
/// strand 2). The first `preamble_rows` records hold mapping statistics and
/// are discarded.
pub fn read_star_file<P: AsRef<Path>>(
    path: P,
    column: CountColumn,
    preamble_rows: usize,
) -> Result<StarCounts> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let col = column.index();
    let mut gene_ids = Vec::new();
    let mut counts = Vec::new();

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if line < preamble_rows {
            continue;
        }
        if record.len() == 1 && record[0].trim().is_empty() {
            continue;
        }
        if record.len() < 4 {
            return Err(PipelineError::InvalidCountMatrix {
                reason: format!(
                    "{}: line {} has {} columns, expected 4",
                    path.display(),
                    line + 1,
                    record.len()
                ),
            });
        }
        let raw = record[col].trim();
        let value: u64 = raw.parse().map_err(|_| PipelineError::InvalidCountMatrix {
            reason: format!("{}: line {}: '{}' is not a count", path.display(), line + 1, raw),
        })?;
        gene_ids.push(record[0].trim().to_string());
        counts.push(value as f64);
    }

    if gene_ids.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: format!("{} has no gene rows after the preamble", path.display()),
        });
    }
    if gene_ids[0].starts_with("N_") {
        log::warn!(
            "{}: first gene row is '{}'; preamble_rows may be too small",
            path.display(),
            gene_ids[0]
        );
    }

    Ok(StarCounts { gene_ids, counts })
}

/// Index of the first row where `found` diverges from `expected`
fn first_divergence(expected: &[String], found: &[String]) -> Option<usize> {
    expected
        .iter()
        .zip(found.iter())
        .position(|(a, b)| a != b)
        .or_else(|| (expected.len() != found.len()).then(|| expected.len().min(found.len())))
}

/// Load one STAR file per sample and assemble a genes x samples matrix.
///
/// The gene order of the first file is the reference; any file that differs
/// in length or in the id at any row aborts the whole load.
pub fn read_star_samples(
    samples: &[(String, PathBuf)],
    column: CountColumn,
    preamble_rows: usize,
) -> Result<CountMatrix> {
    let (first_id, first_path) = samples.first().ok_or_else(|| PipelineError::EmptyData {
        reason: "no samples to load".to_string(),
    })?;

    log::info!("Loading STAR counts for {} samples", samples.len());
    let reference = read_star_file(first_path, column, preamble_rows)?;
    log::debug!("{}: {} genes from {}", first_id, reference.gene_ids.len(), first_path.display());

    let n_genes = reference.gene_ids.len();
    let mut columns = vec![reference.counts];

    for (sample_id, path) in &samples[1..] {
        let current = read_star_file(path, column, preamble_rows)?;
        if let Some(row) = first_divergence(&reference.gene_ids, &current.gene_ids) {
            return Err(PipelineError::GeneOrderMismatch {
                file: path.display().to_string(),
                row,
                expected: reference
                    .gene_ids
                    .get(row)
                    .cloned()
                    .unwrap_or_else(|| END_OF_FILE.to_string()),
                found: current
                    .gene_ids
                    .get(row)
                    .cloned()
                    .unwrap_or_else(|| END_OF_FILE.to_string()),
            });
        }
        log::debug!("{}: gene order matches", sample_id);
        columns.push(current.counts);
    }

    let mut counts = Array2::zeros((n_genes, columns.len()));
    for (j, col) in columns.iter().enumerate() {
        for (i, &v) in col.iter().enumerate() {
            counts[[i, j]] = v;
        }
    }

    let sample_ids = samples.iter().map(|(id, _)| id.clone()).collect();
    CountMatrix::new(counts, reference.gene_ids, sample_ids)
}
