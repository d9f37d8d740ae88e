//! Low-expression gene filter

use crate::data::CountMatrix;
use crate::error::{PipelineError, Result};

/// Genes kept and dropped by [`filter_min_total_reads`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterReport {
    pub kept: usize,
    pub dropped: usize,
}

/// Keep genes whose raw counts summed over all samples reach `min_total`.
///
/// Row order of the kept genes is preserved. An empty result is an error.
pub fn filter_min_total_reads(matrix: &CountMatrix, min_total: f64) -> Result<(CountMatrix, FilterReport)> {
    let keep: Vec<usize> = matrix
        .gene_totals()
        .iter()
        .enumerate()
        .filter(|(_, &total)| total >= min_total)
        .map(|(i, _)| i)
        .collect();
    let report = FilterReport {
        kept: keep.len(),
        dropped: matrix.n_genes() - keep.len(),
    };
    if keep.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: format!("no gene has at least {} total reads", min_total),
        });
    }
    log::info!(
        "Low-expression filter (>= {} reads): kept {} genes, dropped {}",
        min_total,
        report.kept,
        report.dropped
    );
    Ok((matrix.subset_genes(&keep)?, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix() -> CountMatrix {
        CountMatrix::new(
            array![[5.0, 5.0, 5.0, 5.0], [5.0, 5.0, 5.0, 4.0], [0.0, 0.0, 0.0, 0.0], [100.0, 0.0, 0.0, 0.0]],
            vec!["exact".into(), "one_short".into(), "silent".into(), "spiky".into()],
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
        )
        .unwrap()
    }

    #[test]
    fn min_total_reads_partition() {
        let m = matrix();
        let (kept, report) = filter_min_total_reads(&m, 20.0).unwrap();
        assert_eq!(kept.gene_ids(), &["exact".to_string(), "spiky".to_string()]);
        assert_eq!(report, FilterReport { kept: 2, dropped: 2 });
        assert!(kept.gene_totals().iter().all(|&t| t >= 20.0));

        let kept_ids = kept.gene_ids();
        for (id, total) in m.gene_ids().iter().zip(m.gene_totals()) {
            if !kept_ids.contains(id) {
                assert!(total < 20.0, "{} dropped with {} reads", id, total);
            }
        }
    }

    #[test]
    fn test_nothing_left_is_an_error() {
        assert!(matches!(
            filter_min_total_reads(&matrix(), 1000.0),
            Err(PipelineError::EmptyData { .. })
        ));
    }
}
