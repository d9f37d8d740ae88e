//! Negative binomial GLM fitting by iteratively reweighted least squares

use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;

use super::design::{create_design_matrix, DesignInfo};
use super::negative_binomial::{nb_deviance, nb_mean, nb_weight, LARGE_BETA, MIN_MU};
use crate::data::DESeqDataSet;
use crate::error::{PipelineError, Result};

/// IRLS controls
#[derive(Debug, Clone)]
pub struct GlmFitParams {
    pub maxit: usize,
    /// Relative deviance change that counts as converged
    pub tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self { maxit: 100, tol: 1e-8 }
    }
}

/// Fit of one gene, natural-log scale
#[derive(Debug, Clone)]
pub struct GeneFit {
    pub coefficients: Vec<f64>,
    pub standard_errors: Vec<f64>,
    pub converged: bool,
    pub mu: Vec<f64>,
}

impl GeneFit {
    fn undefined(n_coefs: usize, n_samples: usize) -> Self {
        Self {
            coefficients: vec![f64::NAN; n_coefs],
            standard_errors: vec![f64::NAN; n_coefs],
            converged: false,
            mu: vec![f64::NAN; n_samples],
        }
    }
}

/// Default ridge: 1e-6 on the log2 scale, converted to natural log
pub fn default_ridge(n_coefs: usize) -> Vec<f64> {
    let ln2 = std::f64::consts::LN_2;
    vec![1e-6 / (ln2 * ln2); n_coefs]
}

/// Fit `~ design_variable` to every gene using the current dispersions.
///
/// Normalization (size factors or the factor matrix) and dispersions must
/// already be set. Genes without a finite dispersion get `NaN` coefficients.
pub fn fit_glm(dds: &mut DESeqDataSet, params: &GlmFitParams) -> Result<DesignInfo> {
    let dispersions = dds
        .dispersions()
        .ok_or_else(|| PipelineError::GLMConvergenceFailed {
            gene_id: "N/A".to_string(),
            reason: "dispersions must be estimated first".to_string(),
        })?
        .clone();
    let nf = dds.normalization_matrix()?;
    let (design, info) = create_design_matrix(dds.sample_metadata(), dds.design_variable())?;
    let lambda = default_ridge(design.ncols());

    let disp = dispersions.to_vec();
    let (coefficients, standard_errors, converged) = fit_all_genes(dds, &design, &nf, &disp, &lambda, params);

    let n_failed = converged
        .iter()
        .zip(dispersions.iter())
        .filter(|(&c, d)| !c && d.is_finite())
        .count();
    if n_failed > 0 {
        log::warn!("{} genes did not converge in {} IRLS iterations", n_failed, params.maxit);
    }
    log::info!(
        "Fitted {} coefficients ({}) for {} genes",
        info.n_coefs(),
        info.coef_names.join(", "),
        dds.n_genes()
    );

    dds.set_design(design, info.coef_names.clone())?;
    dds.set_glm_results(coefficients, standard_errors, converged)?;
    Ok(info)
}

/// Refit with a per-coefficient ridge (natural-log scale) and return
/// `(coefficients, standard_errors)` without touching the dataset.
pub fn refit_glm_with_prior(
    dds: &DESeqDataSet,
    lambda: &[f64],
    params: &GlmFitParams,
) -> Result<(Array2<f64>, Array2<f64>)> {
    let design = dds
        .design_matrix()
        .ok_or_else(|| PipelineError::InvalidDesignMatrix {
            reason: "GLM must be fitted before refitting with a prior".to_string(),
        })?;
    if lambda.len() != design.ncols() {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} ridge values", design.ncols()),
            got: format!("{}", lambda.len()),
        });
    }
    let dispersions = dds.dispersions().ok_or_else(|| PipelineError::InvalidInput {
        reason: "dispersions must be estimated first".to_string(),
    })?;
    let nf = dds.normalization_matrix()?;
    let disp = dispersions.to_vec();
    let (coefs, se, _) = fit_all_genes(dds, design, &nf, &disp, lambda, params);
    Ok((coefs, se))
}

fn fit_all_genes(
    dds: &DESeqDataSet,
    design: &Array2<f64>,
    nf: &Array2<f64>,
    dispersions: &[f64],
    lambda: &[f64],
    params: &GlmFitParams,
) -> (Array2<f64>, Array2<f64>, Vec<bool>) {
    let counts = dds.counts().counts();
    let n_genes = dds.n_genes();
    let n_coefs = design.ncols();

    let fits: Vec<GeneFit> = (0..n_genes)
        .into_par_iter()
        .map(|i| fit_gene(counts.row(i), design, nf.row(i), dispersions[i], lambda, params))
        .collect();

    let mut coefficients = Array2::zeros((n_genes, n_coefs));
    let mut standard_errors = Array2::zeros((n_genes, n_coefs));
    let mut converged = Vec::with_capacity(n_genes);
    for (i, fit) in fits.into_iter().enumerate() {
        for j in 0..n_coefs {
            coefficients[[i, j]] = fit.coefficients[j];
            standard_errors[[i, j]] = fit.standard_errors[j];
        }
        converged.push(fit.converged);
    }
    (coefficients, standard_errors, converged)
}

/// IRLS for one gene with mu_j = nf_j * exp(x_j' beta).
///
/// Starts from least squares on `ln(k/nf + 0.1)`. The deviance test is only
/// applied from the second iteration on; iteration stops early when any
/// coefficient leaves [-30, 30].
pub fn fit_gene(
    counts: ArrayView1<f64>,
    design: &Array2<f64>,
    nf: ArrayView1<f64>,
    alpha: f64,
    lambda: &[f64],
    params: &GlmFitParams,
) -> GeneFit {
    let (n_samples, n_coefs) = design.dim();
    if !alpha.is_finite() || alpha <= 0.0 {
        return GeneFit::undefined(n_coefs, n_samples);
    }

    let x = DMatrix::from_fn(n_samples, n_coefs, |i, j| design[[i, j]]);
    let k: Vec<f64> = counts.to_vec();
    let nf: Vec<f64> = nf.to_vec();

    let log_norm = DVector::from_fn(n_samples, |i, _| (k[i] / nf[i] + 0.1).ln());
    let mut beta = solve_spd(&(x.transpose() * &x), &(x.transpose() * log_norm)).unwrap_or_else(|| {
        let mean = k.iter().zip(&nf).map(|(c, s)| c / s).sum::<f64>() / n_samples as f64;
        let mut b = DVector::zeros(n_coefs);
        b[0] = mean.max(0.1).ln();
        b
    });

    let ridge = DMatrix::from_diagonal(&DVector::from_column_slice(lambda));
    let mut mu = fitted_means(&x, &beta, &nf);
    let mut dev_old = 0.0;
    let mut converged = false;

    for iter in 0..params.maxit {
        let w: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
        let z = DVector::from_fn(n_samples, |i, _| (mu[i] / nf[i]).ln() + (k[i] - mu[i]) / mu[i]);
        let xtw = weighted_transpose(&x, &w);
        let Some(next) = solve_spd(&(&xtw * &x + &ridge), &(&xtw * z)) else {
            break;
        };
        beta = next;
        if beta.iter().any(|b| b.abs() > LARGE_BETA) {
            break;
        }

        mu = fitted_means(&x, &beta, &nf);
        let dev = nb_deviance(&k, &mu, alpha);
        let conv = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv.is_nan() {
            break;
        }
        if iter > 0 && conv < params.tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    if beta.iter().any(|b| !b.is_finite()) {
        return GeneFit::undefined(n_coefs, n_samples);
    }

    let mu = fitted_means(&x, &beta, &nf);
    let w: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let standard_errors = sandwich_standard_errors(&x, &w, &ridge);

    GeneFit {
        coefficients: beta.iter().copied().collect(),
        standard_errors,
        converged,
        mu,
    }
}

fn fitted_means(x: &DMatrix<f64>, beta: &DVector<f64>, nf: &[f64]) -> Vec<f64> {
    let eta = x * beta;
    eta.iter()
        .zip(nf)
        .map(|(&e, &s)| nb_mean(e, s).max(MIN_MU))
        .collect()
}

/// X' diag(w)
fn weighted_transpose(x: &DMatrix<f64>, w: &[f64]) -> DMatrix<f64> {
    let mut xtw = x.transpose();
    for (j, mut col) in xtw.column_iter_mut().enumerate() {
        col *= w[j];
    }
    xtw
}

/// Cholesky solve, falling back to LU for matrices that are not numerically SPD
fn solve_spd(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let sol = match a.clone().cholesky() {
        Some(chol) => chol.solve(b),
        None => a.clone().lu().solve(b)?,
    };
    sol.iter().all(|v| v.is_finite()).then_some(sol)
}

/// sqrt(diag((X'WX + R)^-1 X'WX (X'WX + R)^-1))
fn sandwich_standard_errors(x: &DMatrix<f64>, w: &[f64], ridge: &DMatrix<f64>) -> Vec<f64> {
    let xtwx = weighted_transpose(x, w) * x;
    let Some(inv) = (&xtwx + ridge).try_inverse() else {
        return vec![f64::NAN; x.ncols()];
    };
    let sigma = &inv * &xtwx * &inv;
    sigma
        .diagonal()
        .iter()
        .map(|&v| if v > 0.0 { v.sqrt() } else { f64::NAN })
        .collect()
}
