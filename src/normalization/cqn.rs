//! GC-content and gene-length offsets
//!
//! A conditional-quantile style normalization: per sample, the log2 CPM of
//! each annotated gene is regressed on cubic polynomials of GC and log2
//! length by median regression. The fitted systematic effects are quantile
//! normalized across samples and the difference becomes a per-gene,
//! per-sample offset. The resulting factors enter the model fixed.

use nalgebra::{DMatrix, DVector};
use ndarray::Array2;

use crate::data::CountMatrix;
use crate::error::{PipelineError, Result};
use crate::io::AlignedAnnotation;

/// Columns of the covariate basis (intercept plus two cubics)
const N_BASIS: usize = 7;
const MAX_ITER: usize = 50;
const TOL: f64 = 1e-6;
const MIN_RESIDUAL: f64 = 1e-4;

/// Normalization factors plus bookkeeping about which genes informed them
#[derive(Debug, Clone)]
pub struct CqnFactors {
    /// Genes x samples, rows centered to geometric mean 1
    pub factors: Array2<f64>,
    /// Rows that entered the regression
    pub annotated: Vec<bool>,
    /// Per-sample coefficients of the median regression
    pub coefficients: Vec<Vec<f64>>,
}

impl CqnFactors {
    pub fn n_annotated(&self) -> usize {
        self.annotated.iter().filter(|&&a| a).count()
    }

    pub fn n_excluded(&self) -> usize {
        self.annotated.len() - self.n_annotated()
    }
}

fn standardize(x: &[f64]) -> Vec<f64> {
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let sd = (x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0)).sqrt();
    let sd = if sd > 0.0 { sd } else { 1.0 };
    x.iter().map(|v| (v - mean) / sd).collect()
}

fn basis(gc: &[f64], log_len: &[f64]) -> DMatrix<f64> {
    let gc = standardize(gc);
    let len = standardize(log_len);
    DMatrix::from_fn(gc.len(), N_BASIS, |i, c| match c {
        0 => 1.0,
        1..=3 => gc[i].powi(c as i32),
        _ => len[i].powi(c as i32 - 3),
    })
}

/// Least absolute deviation fit by iteratively reweighted least squares
fn median_regression(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<DVector<f64>> {
    let p = x.ncols();
    let ridge = DMatrix::<f64>::identity(p, p) * 1e-8;
    let mut weights = DVector::from_element(y.len(), 1.0);
    let mut beta = DVector::zeros(p);

    for iter in 0..MAX_ITER {
        let xtw = DMatrix::from_fn(p, y.len(), |r, i| x[(i, r)] * weights[i]);
        let lhs = &xtw * x + &ridge;
        let rhs = &xtw * y;
        let next = lhs.lu().solve(&rhs).ok_or_else(|| PipelineError::Normalization {
            reason: "singular covariate basis in GC/length regression".to_string(),
        })?;
        let change = (&next - &beta).amax();
        beta = next;
        if iter > 0 && change < TOL {
            break;
        }
        let residuals = y - x * &beta;
        weights = residuals.map(|r| 1.0 / r.abs().max(MIN_RESIDUAL));
    }
    Ok(beta)
}

/// Replace every column by the row-wise mean of the sorted columns
fn quantile_normalize(fitted: &Array2<f64>) -> Array2<f64> {
    let (n, m) = fitted.dim();
    let mut target = vec![0.0; n];
    let mut ranks: Vec<Vec<usize>> = Vec::with_capacity(m);
    for col in fitted.columns() {
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| col[a].total_cmp(&col[b]));
        for (r, &i) in order.iter().enumerate() {
            target[r] += col[i] / m as f64;
        }
        ranks.push(order);
    }
    let mut out = Array2::zeros((n, m));
    for (j, order) in ranks.iter().enumerate() {
        for (r, &i) in order.iter().enumerate() {
            out[[i, j]] = target[r];
        }
    }
    out
}

/// Per-gene, per-sample normalization factors from GC and length.
///
/// Genes lacking either covariate are excluded from the regression with a
/// warning and receive library-size-only factors.
pub fn cqn_normalization_factors(matrix: &CountMatrix, annotation: &AlignedAnnotation) -> Result<CqnFactors> {
    if annotation.gene_ids.as_slice() != matrix.gene_ids() {
        return Err(PipelineError::AnnotationMismatch {
            reason: "annotation is not aligned with the count matrix gene order".to_string(),
        });
    }
    let annotated = annotation.covariate_mask();
    let rows: Vec<usize> = (0..annotated.len()).filter(|&i| annotated[i]).collect();
    let excluded = annotated.len() - rows.len();
    if excluded > 0 {
        log::warn!(
            "{} of {} genes lack length or GC and are excluded from the GC/length regression",
            excluded,
            annotated.len()
        );
    }
    if rows.len() <= N_BASIS {
        return Err(PipelineError::Normalization {
            reason: format!("{} genes with length and GC; at least {} are needed", rows.len(), N_BASIS + 1),
        });
    }

    let lengths = annotation.lengths();
    let gcs = annotation.gc();
    let gc: Vec<f64> = rows.iter().map(|&i| gcs[i].unwrap_or(f64::NAN)).collect();
    let log_len: Vec<f64> = rows.iter().map(|&i| lengths[i].unwrap_or(f64::NAN).log2()).collect();
    let x = basis(&gc, &log_len);

    let counts = matrix.counts();
    let lib_sizes = matrix.library_sizes();
    let n_samples = matrix.n_samples();
    let mut fitted = Array2::zeros((rows.len(), n_samples));
    let mut coefficients = Vec::with_capacity(n_samples);
    for j in 0..n_samples {
        let y = DVector::from_iterator(
            rows.len(),
            rows.iter().map(|&i| ((counts[[i, j]] + 0.5) / (lib_sizes[j] + 1.0) * 1e6).log2()),
        );
        let beta = median_regression(&x, &y)?;
        let f = &x * &beta;
        for (r, v) in f.iter().enumerate() {
            fitted[[r, j]] = *v;
        }
        log::debug!("GC/length fit for {}: {:?}", matrix.sample_ids()[j], beta.as_slice());
        coefficients.push(beta.iter().copied().collect());
    }
    let target = quantile_normalize(&fitted);

    let mut factors = Array2::from_shape_fn((matrix.n_genes(), n_samples), |(_, j)| lib_sizes[j] / 1e6);
    for (r, &i) in rows.iter().enumerate() {
        for j in 0..n_samples {
            let offset = fitted[[r, j]] - target[[r, j]];
            factors[[i, j]] *= offset.exp2();
        }
    }
    if factors.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
        return Err(PipelineError::Normalization {
            reason: "non-positive normalization factor (empty library?)".to_string(),
        });
    }
    for mut row in factors.rows_mut() {
        let log_mean = row.iter().map(|v| v.ln()).sum::<f64>() / n_samples as f64;
        row.mapv_inplace(|v| v / log_mean.exp());
    }

    log::info!("GC/length normalization factors from {} annotated genes", rows.len());
    Ok(CqnFactors {
        factors,
        annotated,
        coefficients,
    })
}
