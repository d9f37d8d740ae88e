//! Gene-by-sample read count matrix

use std::collections::{HashMap, HashSet};

use ndarray::{concatenate, Array2, ArrayView2, Axis};

use crate::error::{PipelineError, Result};

/// Make gene identifiers unique by suffixing repeats with `_1`, `_2`, ...
///
/// A suffix is skipped when that name already occurs in the input or was
/// handed out earlier.
fn deduplicate_gene_ids(ids: Vec<String>) -> Vec<String> {
    let mut taken: HashSet<String> = ids.iter().cloned().collect();
    let mut repeats: HashMap<String, usize> = HashMap::with_capacity(ids.len());
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let n = repeats.entry(id.clone()).or_insert(0);
        *n += 1;
        if *n == 1 {
            out.push(id);
            continue;
        }
        let mut suffix = *n - 1;
        let renamed = loop {
            let candidate = format!("{}_{}", id, suffix);
            if !taken.contains(&candidate) {
                break candidate;
            }
            suffix += 1;
        };
        *n = suffix + 1;
        log::warn!("Duplicate gene id '{}' renamed to '{}'", id, renamed);
        taken.insert(renamed.clone());
        out.push(renamed);
    }
    out
}

/// Raw read counts, genes in rows and samples in columns.
///
/// Values are stored as `f64` but are validated to be non-negative integers.
/// Gene ids are unique after construction.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Build a count matrix, checking shape and value domain
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} gene ids", n_genes),
                got: format!("{} gene ids", gene_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} sample ids", n_samples),
                got: format!("{} sample ids", sample_ids.len()),
            });
        }

        if counts.iter().any(|&x| !x.is_finite() || x < 0.0) {
            return Err(PipelineError::InvalidCountMatrix {
                reason: "counts must be non-negative finite values".to_string(),
            });
        }
        if counts.iter().any(|&x| x != x.round()) {
            return Err(PipelineError::InvalidCountMatrix {
                reason: "counts must be integers".to_string(),
            });
        }

        let mut seen = HashSet::with_capacity(sample_ids.len());
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(PipelineError::InvalidCountMatrix {
                    reason: format!("duplicate sample id '{}'", id),
                });
            }
        }

        Ok(Self {
            counts,
            gene_ids: deduplicate_gene_ids(gene_ids),
            sample_ids,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Total reads per sample
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }

    /// Total reads per gene across all samples
    pub fn gene_totals(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(0)).map(|row| row.sum()).collect()
    }

    pub fn subset_genes(&self, gene_indices: &[usize]) -> Result<Self> {
        let counts = self.counts.select(Axis(0), gene_indices);
        let gene_ids = gene_indices.iter().map(|&i| self.gene_ids[i].clone()).collect();
        Self::new(counts, gene_ids, self.sample_ids.clone())
    }

    /// Append the columns of `other` to the right of `self`.
    ///
    /// Both matrices must list exactly the same genes in the same order.
    pub fn concat_samples(&self, other: &CountMatrix, other_label: &str) -> Result<Self> {
        if self.n_genes() != other.n_genes() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} genes", self.n_genes()),
                got: format!("{} genes in {}", other.n_genes(), other_label),
            });
        }
        if let Some(row) = self
            .gene_ids
            .iter()
            .zip(other.gene_ids.iter())
            .position(|(a, b)| a != b)
        {
            return Err(PipelineError::GeneOrderMismatch {
                file: other_label.to_string(),
                row,
                expected: self.gene_ids[row].clone(),
                found: other.gene_ids[row].clone(),
            });
        }

        let counts = concatenate(Axis(1), &[self.counts.view(), other.counts.view()]).map_err(|e| {
            PipelineError::InvalidCountMatrix {
                reason: e.to_string(),
            }
        })?;
        let mut sample_ids = self.sample_ids.clone();
        sample_ids.extend(other.sample_ids.iter().cloned());
        Self::new(counts, self.gene_ids.clone(), sample_ids)
    }
}
