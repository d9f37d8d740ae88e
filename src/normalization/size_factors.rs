//! Size factor estimation using the median of ratios method

use ndarray::{Array1, ArrayView2, Axis};

use crate::data::DESeqDataSet;
use crate::error::{PipelineError, Result};

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeFactorMethod {
    /// Median of ratios against the geometric mean of genes with no zeros
    Ratio,
    /// Geometric mean over positive counts only, for matrices where every gene has a zero
    PosCounts,
}

/// Estimate size factors and store them on the dataset.
///
/// `Ratio` falls back to `PosCounts` when no gene is free of zeros, which
/// happens with sparse pseudobulk columns.
pub fn estimate_size_factors(dds: &mut DESeqDataSet, method: SizeFactorMethod) -> Result<()> {
    let counts = dds.counts().counts();
    let size_factors = match method {
        SizeFactorMethod::Ratio => match median_of_ratios(counts, false) {
            Err(PipelineError::SizeFactorFailed { reason }) => {
                log::warn!("{}; falling back to positive-counts geometric means", reason);
                median_of_ratios(counts, true)?
            }
            other => other?,
        },
        SizeFactorMethod::PosCounts => median_of_ratios(counts, true)?,
    };
    log::debug!("size factors: {:?}", size_factors);
    dds.set_size_factors(size_factors)
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

/// Median of ratios; `positive_only` takes geometric means over positive
/// counts while still dividing by the full sample count.
pub fn median_of_ratios(counts: ArrayView2<f64>, positive_only: bool) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(PipelineError::EmptyData {
            reason: "count matrix is empty".to_string(),
        });
    }

    let geo_means: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter_map(|(i, row)| {
            let usable = if positive_only {
                row.iter().any(|&x| x > 0.0)
            } else {
                row.iter().all(|&x| x > 0.0)
            };
            if !usable {
                return None;
            }
            let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|&x| x.ln()).sum();
            Some((i, (log_sum / n_samples as f64).exp()))
        })
        .collect();

    if geo_means.is_empty() {
        return Err(PipelineError::SizeFactorFailed {
            reason: "no genes with all non-zero counts".to_string(),
        });
    }

    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let mut ratios: Vec<f64> = geo_means
            .iter()
            .filter(|(i, _)| counts[[*i, j]] > 0.0)
            .map(|&(i, gm)| counts[[i, j]] / gm)
            .collect();
        size_factors[j] = if ratios.is_empty() {
            if positive_only {
                1.0
            } else {
                return Err(PipelineError::SizeFactorFailed {
                    reason: format!("no valid ratios for sample {}", j),
                });
            }
        } else {
            median(&mut ratios)
        };
    }

    if positive_only {
        // keep geometric mean of the factors at 1
        let center = (size_factors.iter().map(|x: &f64| x.ln()).sum::<f64>() / n_samples as f64).exp();
        size_factors.mapv_inplace(|x| x / center);
    }

    if size_factors.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
        return Err(PipelineError::SizeFactorFailed {
            reason: "invalid size factors computed".to_string(),
        });
    }
    Ok(size_factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use ndarray::array;

    fn create_test_dds(counts: ndarray::Array2<f64>) -> DESeqDataSet {
        let samples: Vec<String> = (1..=4).map(|i| format!("s{}", i)).collect();
        let genes: Vec<String> = (1..=counts.nrows()).map(|i| format!("gene{}", i)).collect();
        let counts = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut metadata = SampleMetadata::new(samples).unwrap();
        metadata
            .add_column("condition", vec!["A".into(), "A".into(), "B".into(), "B".into()])
            .unwrap();
        DESeqDataSet::new(counts, metadata, "condition").unwrap()
    }

    #[test]
    fn test_size_factor_estimation() {
        let mut dds = create_test_dds(array![
            [100.0, 200.0, 80.0, 160.0],
            [500.0, 1000.0, 400.0, 800.0],
            [50.0, 100.0, 40.0, 80.0],
            [200.0, 400.0, 160.0, 320.0]
        ]);
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        let sf = dds.size_factors().unwrap();
        assert!(sf.iter().all(|&x| x > 0.0));
        assert!((sf[1] / sf[0] - 2.0).abs() < 0.1);

        let norm = dds.normalized_counts().unwrap();
        let mean = norm.row(0).sum() / 4.0;
        assert!(norm.row(0).iter().all(|v| (v - mean).abs() / mean < 0.1));
    }

    #[test]
    fn test_ratio_falls_back_when_every_gene_has_a_zero() {
        let mut dds = create_test_dds(array![[0.0, 10.0, 20.0, 10.0], [10.0, 0.0, 10.0, 20.0]]);
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        let sf = dds.size_factors().unwrap();
        let log_mean: f64 = sf.iter().map(|x| x.ln()).sum::<f64>() / 4.0;
        assert!(log_mean.abs() < 1e-12);
    }
}
