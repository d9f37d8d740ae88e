//! Sample-level PCA and distances on variance-stabilized values

use std::path::Path;

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, Axis};

use crate::error::{PipelineError, Result};
use crate::io::artifacts::format_f64;
use crate::transform::VstResult;

#[derive(Debug, Clone, PartialEq)]
pub struct PcaResult {
    pub sample_ids: Vec<String>,
    pub pc1: Vec<f64>,
    pub pc2: Vec<f64>,
    /// Percent of total variance carried by PC1 and PC2
    pub percent_var: [f64; 2],
    /// Number of genes used
    pub n_genes: usize,
}

/// Rows of the `top_genes` most variable genes
fn top_variable_rows(data: &Array2<f64>, top_genes: usize) -> Vec<usize> {
    let vars = data.var_axis(Axis(1), 1.0);
    let mut order: Vec<usize> = (0..data.nrows()).filter(|&i| vars[i].is_finite()).collect();
    order.sort_by(|&a, &b| vars[b].total_cmp(&vars[a]).then(a.cmp(&b)));
    order.truncate(top_genes);
    order
}

/// PC1 and PC2 of the samples, from the eigen-decomposition of the
/// samples x samples Gram matrix of gene-centered values.
///
/// Each component is signed so that its largest-magnitude score is positive.
pub fn pca(vst: &VstResult, top_genes: usize) -> Result<PcaResult> {
    let m = vst.data.ncols();
    if m < 2 {
        return Err(PipelineError::InvalidInput {
            reason: format!("PCA needs at least 2 samples, got {}", m),
        });
    }
    let rows = top_variable_rows(&vst.data, top_genes);
    if rows.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: "no genes with finite variance for PCA".to_string(),
        });
    }
    let mut x = vst.data.select(Axis(0), &rows);
    for mut row in x.rows_mut() {
        let mean = row.mean().unwrap_or(0.0);
        row -= mean;
    }

    let gram = x.t().dot(&x);
    let gram = DMatrix::from_fn(m, m, |i, j| gram[[i, j]]);
    let eigen = SymmetricEigen::new(gram);
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
    let total: f64 = eigen.eigenvalues.iter().map(|v| v.max(0.0)).sum();

    let component = |k: usize| -> (Vec<f64>, f64) {
        let idx = order[k];
        let lambda = eigen.eigenvalues[idx].max(0.0);
        let mut scores: Vec<f64> = eigen.eigenvectors.column(idx).iter().map(|v| v * lambda.sqrt()).collect();
        let pivot = scores.iter().copied().fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        if pivot < 0.0 {
            scores.iter_mut().for_each(|v| *v = -*v);
        }
        let pct = if total > 0.0 { 100.0 * lambda / total } else { 0.0 };
        (scores, pct)
    };
    let (pc1, pct1) = component(0);
    let (pc2, pct2) = component(1);

    log::info!("PCA on {} genes: PC1 {:.1}%, PC2 {:.1}%", rows.len(), pct1, pct2);
    Ok(PcaResult {
        sample_ids: vst.sample_ids.clone(),
        pc1,
        pc2,
        percent_var: [pct1, pct2],
        n_genes: rows.len(),
    })
}

/// Euclidean distances between samples (columns)
pub fn sample_distances(vst: &VstResult) -> Array2<f64> {
    let m = vst.data.ncols();
    Array2::from_shape_fn((m, m), |(a, b)| {
        let diff = &vst.data.column(a) - &vst.data.column(b);
        diff.mapv(|d| d * d).sum().sqrt()
    })
}

pub fn write_pca_tsv(path: &Path, result: &PcaResult, conditions: &[String]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["sample", "PC1", "PC2", "condition"])?;
    for (i, sample) in result.sample_ids.iter().enumerate() {
        writer.write_record([
            sample.as_str(),
            format_f64(result.pc1[i]).as_str(),
            format_f64(result.pc2[i]).as_str(),
            conditions.get(i).map(String::as_str).unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_distances_tsv(path: &Path, distances: &Array2<f64>, sample_ids: &[String]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    let mut header = vec!["sample".to_string()];
    header.extend(sample_ids.iter().cloned());
    writer.write_record(&header)?;
    for (i, row) in distances.rows().into_iter().enumerate() {
        let mut record = vec![sample_ids[i].clone()];
        record.extend(row.iter().map(|&d| format_f64(d)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::VstMethod;
    use ndarray::array;

    fn vst() -> VstResult {
        VstResult {
            data: array![
                [1.0, 1.2, 5.0, 5.1],
                [2.0, 2.1, 2.0, 2.1],
                [7.0, 7.3, 3.0, 3.2],
                [4.0, 4.0, 4.0, 4.0]
            ],
            gene_ids: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            sample_ids: vec!["c1".into(), "c2".into(), "d1".into(), "d2".into()],
            method: VstMethod::Mean(0.1),
        }
    }

    #[test]
    fn test_pc1_separates_groups() {
        let res = pca(&vst(), 500).unwrap();
        assert_eq!(res.n_genes, 4);
        assert!(res.percent_var[0] > 90.0);
        assert!(res.percent_var[0] + res.percent_var[1] <= 100.0 + 1e-9);
        assert!(res.pc1[0] * res.pc1[2] < 0.0);
        assert!(res.pc1[0] * res.pc1[1] > 0.0);
        // scores are centered
        assert!(res.pc1.iter().sum::<f64>().abs() < 1e-9);
    }

    #[test]
    fn test_top_genes_limit() {
        let res = pca(&vst(), 1).unwrap();
        assert_eq!(res.n_genes, 1);
        assert_eq!(top_variable_rows(&vst().data, 2), vec![2, 0]);
    }

    #[test]
    fn test_distances_symmetric() {
        let d = sample_distances(&vst());
        assert_eq!(d[[0, 0]], 0.0);
        assert_eq!(d[[1, 3]], d[[3, 1]]);
        assert!(d[[0, 2]] > d[[0, 1]]);
    }
}
