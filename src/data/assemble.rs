//! Combine real-sample and pseudobulk count matrices into one experiment

use std::collections::{HashMap, HashSet};

use super::metadata::NA_LEVEL;
use super::{CountMatrix, SampleMetadata};
use crate::error::{PipelineError, Result};

/// Labels stamped on every pseudobulk column
#[derive(Debug, Clone)]
pub struct PseudobulkLabels {
    pub condition_column: String,
    pub condition: String,
    pub pool: Option<String>,
}

/// Real columns first, then pseudobulk columns, with matching metadata rows.
///
/// Both matrices must already list the same genes in the same order; no
/// reconciliation happens here. See [`restrict_to_common_genes`].
pub fn assemble(
    real: &CountMatrix,
    real_meta: &SampleMetadata,
    pseudo: &CountMatrix,
    labels: &PseudobulkLabels,
) -> Result<(CountMatrix, SampleMetadata)> {
    if real.sample_ids() != real_meta.sample_ids() {
        return Err(PipelineError::InvalidMetadata {
            reason: "real-sample metadata is not in count matrix column order".to_string(),
        });
    }
    let real_ids: HashSet<&str> = real.sample_ids().iter().map(String::as_str).collect();
    if let Some(clash) = pseudo.sample_ids().iter().find(|s| real_ids.contains(s.as_str())) {
        return Err(PipelineError::InvalidMetadata {
            reason: format!("sample id '{}' appears in both real and pseudobulk data", clash),
        });
    }

    let combined = real.concat_samples(pseudo, "pseudobulk matrix")?;

    let n_pseudo = pseudo.n_samples();
    let mut pseudo_meta = SampleMetadata::new(pseudo.sample_ids().to_vec())?;
    pseudo_meta.add_column(&labels.condition_column, vec![labels.condition.clone(); n_pseudo])?;
    pseudo_meta.add_column(
        "pool",
        vec![labels.pool.clone().unwrap_or_else(|| NA_LEVEL.to_string()); n_pseudo],
    )?;
    let meta = real_meta.concat(&pseudo_meta)?;

    if combined.n_samples() != real.n_samples() + pseudo.n_samples() {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} columns", real.n_samples() + pseudo.n_samples()),
            got: format!("{} columns", combined.n_samples()),
        });
    }
    if meta.sample_ids() != combined.sample_ids() {
        return Err(PipelineError::InvalidMetadata {
            reason: "combined metadata rows do not follow combined columns".to_string(),
        });
    }

    log::info!(
        "Assembled {} genes x {} samples ({} real, {} pseudobulk)",
        combined.n_genes(),
        combined.n_samples(),
        real.n_samples(),
        n_pseudo
    );
    Ok((combined, meta))
}

/// Reduce both matrices to the genes they share, in the order of `a`.
///
/// This is the explicit caller-side pre-filter that makes [`assemble`]'s
/// precondition hold.
pub fn restrict_to_common_genes(a: &CountMatrix, b: &CountMatrix) -> Result<(CountMatrix, CountMatrix)> {
    let b_index: HashMap<&str, usize> = b
        .gene_ids()
        .iter()
        .enumerate()
        .map(|(i, g)| (g.as_str(), i))
        .collect();

    let (a_rows, b_rows): (Vec<usize>, Vec<usize>) = a
        .gene_ids()
        .iter()
        .enumerate()
        .filter_map(|(i, g)| b_index.get(g.as_str()).map(|&j| (i, j)))
        .unzip();

    if a_rows.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: "the two matrices share no gene ids".to_string(),
        });
    }
    let dropped_a = a.n_genes() - a_rows.len();
    let dropped_b = b.n_genes() - b_rows.len();
    if dropped_a + dropped_b > 0 {
        log::warn!(
            "Restricting to {} shared genes ({} only in the first matrix, {} only in the second)",
            a_rows.len(),
            dropped_a,
            dropped_b
        );
    }
    Ok((a.subset_genes(&a_rows)?, b.subset_genes(&b_rows)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn real() -> (CountMatrix, SampleMetadata) {
        let m = CountMatrix::new(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            s(&["g1", "g2"]),
            s(&["A1", "A2", "A3"]),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(s(&["A1", "A2", "A3"])).unwrap();
        meta.add_column("condition", s(&["bulk", "bulk", "bulk"])).unwrap();
        meta.add_column("pool", s(&["p1", "p2", "p3"])).unwrap();
        (m, meta)
    }

    fn labels() -> PseudobulkLabels {
        PseudobulkLabels {
            condition_column: "condition".into(),
            condition: "pseudobulk".into(),
            pool: None,
        }
    }

    #[test]
    fn combined_columns_and_metadata_align() {
        let (m, meta) = real();
        let pb =
            CountMatrix::new(array![[7.0, 8.0], [9.0, 10.0]], s(&["g1", "g2"]), s(&["PB1", "PB2"])).unwrap();
        let (combined, cmeta) = assemble(&m, &meta, &pb, &labels()).unwrap();

        assert_eq!(combined.n_samples(), m.n_samples() + pb.n_samples());
        assert_eq!(cmeta.n_samples(), combined.n_samples());
        assert_eq!(cmeta.sample_ids(), combined.sample_ids());
        assert_eq!(
            cmeta.column("condition").unwrap(),
            &["bulk", "bulk", "bulk", "pseudobulk", "pseudobulk"]
        );
        assert_eq!(cmeta.column("pool").unwrap()[4], "NA");
        assert_eq!(combined.counts()[[1, 4]], 10.0);
    }

    #[test]
    fn misordered_genes_are_rejected() {
        let (m, meta) = real();
        let pb = CountMatrix::new(array![[7.0], [9.0]], s(&["g2", "g1"]), s(&["PB1"])).unwrap();
        assert!(matches!(
            assemble(&m, &meta, &pb, &labels()),
            Err(PipelineError::GeneOrderMismatch { .. })
        ));

        let (a, b) = restrict_to_common_genes(&m, &pb).unwrap();
        assert_eq!(a.gene_ids(), b.gene_ids());
        assert!(assemble(&a, &meta, &b, &labels()).is_ok());
    }

    #[test]
    fn clashing_sample_ids_are_rejected() {
        let (m, meta) = real();
        let pb = CountMatrix::new(array![[7.0], [9.0]], s(&["g1", "g2"]), s(&["A1"])).unwrap();
        assert!(assemble(&m, &meta, &pb, &labels()).is_err());
    }
}
