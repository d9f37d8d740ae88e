//! Gene-wise dispersion by Cox-Reid adjusted profile likelihood

use nalgebra::DMatrix;
use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;
use statrs::function::gamma::{digamma, ln_gamma};

use super::{DispersionDesign, DispersionParams};
use crate::data::DESeqDataSet;
use crate::error::{PipelineError, Result};

/// Upper clamp on proposals of the line search, log scale
const LOG_ALPHA_CEILING: f64 = 10.0;
/// Lower clamp on proposals of the line search, log scale
const LOG_ALPHA_FLOOR: f64 = -30.0;
const ARMIJO_EPSILON: f64 = 1e-4;

/// Normal prior on log(alpha), used by the MAP step
#[derive(Debug, Clone, Copy)]
pub(super) struct LogNormalPrior {
    pub mean: f64,
    pub var: f64,
}

/// Everything the likelihood needs for one gene
pub(super) struct GeneData<'a> {
    pub counts: &'a [f64],
    pub mu: &'a [f64],
    pub x: &'a DMatrix<f64>,
}

impl GeneData<'_> {
    /// X' diag(w) X with w = 1 / (1/mu + alpha), and its derivative in alpha
    fn information(&self, alpha: f64) -> (DMatrix<f64>, DMatrix<f64>) {
        let p = self.x.ncols();
        let mut b = DMatrix::zeros(p, p);
        let mut db = DMatrix::zeros(p, p);
        for (i, &mu) in self.mu.iter().enumerate() {
            let w = 1.0 / (1.0 / mu + alpha);
            let row = self.x.row(i);
            let outer = row.transpose() * row;
            b += &outer * w;
            db -= outer * (w * w);
        }
        (b, db)
    }

    /// Log posterior in log(alpha): NB log-likelihood, Cox-Reid term and
    /// an optional normal prior.
    pub fn log_posterior(&self, log_alpha: f64, prior: Option<LogNormalPrior>) -> f64 {
        let alpha = log_alpha.exp();
        let size = 1.0 / alpha;
        let ll: f64 = self
            .counts
            .iter()
            .zip(self.mu)
            .map(|(&y, &mu)| {
                ln_gamma(y + size) - ln_gamma(size) - y * (mu + size).ln() - size * (1.0 + mu * alpha).ln()
            })
            .sum();

        let det = self.information(alpha).0.determinant();
        let cox_reid = if det > 0.0 { -0.5 * det.ln() } else { 0.0 };

        let log_prior = prior.map_or(0.0, |p| -0.5 * (log_alpha - p.mean).powi(2) / p.var);
        ll + cox_reid + log_prior
    }

    /// Derivative of [`Self::log_posterior`] with respect to log(alpha)
    pub fn d_log_posterior(&self, log_alpha: f64, prior: Option<LogNormalPrior>) -> f64 {
        let alpha = log_alpha.exp();
        let size = 1.0 / alpha;
        let a2 = alpha * alpha;
        let dll: f64 = self
            .counts
            .iter()
            .zip(self.mu)
            .map(|(&y, &mu)| {
                (digamma(size) - digamma(y + size)) / a2 + y / (a2 * (mu + size))
                    + (1.0 + mu * alpha).ln() / a2
                    - mu / (alpha * (1.0 + mu * alpha))
            })
            .sum();

        let (b, db) = self.information(alpha);
        let dcr = match b.try_inverse() {
            Some(inv) => -0.5 * (inv * db).trace(),
            None => 0.0,
        };

        let dprior = prior.map_or(0.0, |p| -(log_alpha - p.mean) / p.var);
        (dll + dcr) * alpha + dprior
    }
}

/// Outcome of the Armijo line search
pub(super) struct LineSearch {
    pub log_alpha: f64,
    pub initial_lp: f64,
    pub final_lp: f64,
    pub iterations: usize,
}

/// Maximize the log posterior in log(alpha) by gradient ascent with
/// Armijo backtracking.
///
/// Stops when an accepted step improves the posterior by less than
/// `params.disp_tol` or the estimate drops below `min_log_alpha`.
pub(super) fn armijo_line_search(
    gene: &GeneData<'_>,
    start: f64,
    prior: Option<LogNormalPrior>,
    min_log_alpha: f64,
    params: &DispersionParams,
) -> LineSearch {
    let mut log_alpha = start;
    let initial_lp = gene.log_posterior(log_alpha, prior);
    let mut lp = initial_lp;
    let mut dlp = gene.d_log_posterior(log_alpha, prior);
    let mut kappa = params.kappa_0;
    let mut accepted = 0usize;
    let mut iterations = params.maxit;

    for iter in 0..params.maxit {
        let mut proposal = log_alpha + kappa * dlp;
        if proposal < LOG_ALPHA_FLOOR {
            kappa = (LOG_ALPHA_FLOOR - log_alpha) / dlp;
            proposal = log_alpha + kappa * dlp;
        }
        if proposal > LOG_ALPHA_CEILING {
            kappa = (LOG_ALPHA_CEILING - log_alpha) / dlp;
            proposal = log_alpha + kappa * dlp;
        }

        let lp_new = gene.log_posterior(proposal, prior);
        if -lp_new > -lp - kappa * ARMIJO_EPSILON * dlp * dlp {
            kappa /= 2.0;
            continue;
        }

        accepted += 1;
        log_alpha = proposal;
        let change = lp_new - lp;
        lp = lp_new;
        if change < params.disp_tol || log_alpha < min_log_alpha {
            iterations = iter + 1;
            break;
        }
        dlp = gene.d_log_posterior(log_alpha, prior);
        kappa = (kappa * 1.1).min(params.kappa_0);
        if accepted % 5 == 0 {
            kappa /= 2.0;
        }
    }

    LineSearch {
        log_alpha,
        initial_lp,
        final_lp: lp,
        iterations,
    }
}

/// Two-pass grid search over [ln min_disp, ln max_disp]: a coarse grid of
/// 20 points, then 20 points around the best coarse value.
pub(super) fn grid_search(
    gene: &GeneData<'_>,
    prior: Option<LogNormalPrior>,
    min_disp: f64,
    max_disp: f64,
) -> f64 {
    const N: usize = 20;
    let best_on = |lo: f64, hi: f64| {
        let step = (hi - lo) / (N - 1) as f64;
        let best = (0..N)
            .map(|i| lo + i as f64 * step)
            .map(|a| (a, gene.log_posterior(a, prior)))
            .filter(|(_, lp)| lp.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(lo, |(a, _)| a);
        (best, step)
    };
    let (coarse, step) = best_on(min_disp.ln(), max_disp.ln());
    let (fine, _) = best_on(coarse - step, coarse + step);
    fine.exp()
}

/// Group means of `k / nf`, scaled back by `nf`, floored at 0.5
pub(super) fn linear_model_mu(
    counts: ArrayView1<f64>,
    nf: ArrayView1<f64>,
    design: &DispersionDesign,
) -> Vec<f64> {
    let mut sums = vec![0.0; design.n_groups];
    let mut sizes = vec![0usize; design.n_groups];
    for ((&k, &s), &g) in counts.iter().zip(nf.iter()).zip(&design.groups) {
        sums[g] += k / s;
        sizes[g] += 1;
    }
    design
        .groups
        .iter()
        .zip(nf.iter())
        .map(|(&g, &s)| (sums[g] / sizes[g] as f64 * s).max(0.5))
        .collect()
}

/// sum(((y - mu)^2 - mu) / mu^2) / (m - p) on normalized counts
fn rough_disp_estimate(normalized: &[f64], design: &DispersionDesign) -> f64 {
    let mut sums = vec![0.0; design.n_groups];
    let mut sizes = vec![0usize; design.n_groups];
    for (&y, &g) in normalized.iter().zip(&design.groups) {
        sums[g] += y;
        sizes[g] += 1;
    }
    let est: f64 = normalized
        .iter()
        .zip(&design.groups)
        .map(|(&y, &g)| {
            let mu = (sums[g] / sizes[g] as f64).max(1.0);
            ((y - mu).powi(2) - mu) / (mu * mu)
        })
        .sum::<f64>()
        / design.residual_df() as f64;
    est.max(0.0)
}

/// (var - xim * mean) / mean^2
fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let n = normalized.len() as f64;
    let mean = normalized.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return f64::INFINITY;
    }
    let var = normalized.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (var - xim * mean) / (mean * mean)
}

/// Gene-wise estimate for one gene; `NaN` for an all-zero row
pub fn estimate_dispersion_gene(
    counts: ArrayView1<f64>,
    nf: ArrayView1<f64>,
    design: &DispersionDesign,
    xim: f64,
    params: &DispersionParams,
) -> f64 {
    if counts.iter().all(|&k| k == 0.0) {
        return f64::NAN;
    }
    let max_disp = design.max_disp();
    let normalized: Vec<f64> = counts.iter().zip(nf.iter()).map(|(k, s)| k / s).collect();
    let init = rough_disp_estimate(&normalized, design)
        .min(moments_disp_estimate(&normalized, xim))
        .clamp(params.min_disp, max_disp);

    let k = counts.to_vec();
    let mu = linear_model_mu(counts, nf, design);
    let gene = GeneData {
        counts: &k,
        mu: &mu,
        x: &design.x,
    };

    let search = armijo_line_search(&gene, init.ln(), None, (params.min_disp / 10.0).ln(), params);
    let no_increase = search.final_lp < search.initial_lp + search.initial_lp.abs() / 1e6;
    let mut alpha = if no_increase { init } else { search.log_alpha.exp() };

    let converged = search.iterations < params.maxit && search.iterations != 1;
    if !converged && alpha > params.min_disp * 10.0 {
        alpha = grid_search(&gene, None, params.min_disp, max_disp);
    }
    alpha.clamp(params.min_disp, max_disp)
}

/// Estimate gene-wise dispersions for every gene of the dataset
pub fn estimate_gene_dispersions(dds: &mut DESeqDataSet, params: &DispersionParams) -> Result<()> {
    if !dds.has_normalization() {
        return Err(PipelineError::DispersionEstimationFailed {
            gene_id: "N/A".to_string(),
            reason: "size factors or normalization factors must be set first".to_string(),
        });
    }
    let design = DispersionDesign::from_dataset(dds)?;
    let nf = dds.normalization_matrix()?;
    let counts = dds.counts().counts();

    // mean over samples of 1 / (column mean of the factors)
    let xim = nf
        .columns()
        .into_iter()
        .map(|c| 1.0 / c.mean().unwrap_or(1.0))
        .sum::<f64>()
        / dds.n_samples() as f64;

    let estimates: Vec<f64> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| estimate_dispersion_gene(counts.row(i), nf.row(i), &design, xim, params))
        .collect();

    let n_zero = estimates.iter().filter(|d| d.is_nan()).count();
    log::info!(
        "Gene-wise dispersions: {} genes estimated, {} all-zero genes skipped",
        estimates.len() - n_zero,
        n_zero
    );
    dds.set_gene_dispersions(Array1::from_vec(estimates))
}
