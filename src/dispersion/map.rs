//! Maximum a posteriori dispersions shrunk toward the trend

use ndarray::Array1;
use rayon::prelude::*;

use super::gene_wise::{armijo_line_search, grid_search, linear_model_mu, GeneData, LogNormalPrior};
use super::{DispersionDesign, DispersionParams};
use crate::data::DESeqDataSet;
use crate::error::{PipelineError, Result};
use crate::stats::{mad, trigamma};

/// Floor on the prior variance of log dispersions
const MIN_PRIOR_VAR: f64 = 0.25;

/// `(prior_var, var_log_disp_ests)` from the log residuals of gene-wise
/// estimates around the trend.
///
/// `var_log_disp_ests` is mad^2 of the residuals of genes above
/// `100 * min_disp`; the expected sampling variance trigamma((m - p) / 2) is
/// subtracted and the result floored at 0.25.
pub fn estimate_prior_variance(
    gene: &[f64],
    trend: &[f64],
    residual_df: usize,
    min_disp: f64,
) -> (f64, f64) {
    let residuals: Vec<f64> = gene
        .iter()
        .zip(trend)
        .filter(|(g, t)| g.is_finite() && **g >= 100.0 * min_disp && t.is_finite() && **t > 0.0)
        .map(|(g, t)| g.ln() - t.ln())
        .collect();
    if residuals.len() < 3 {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }
    let var_log = mad(&residuals).powi(2);
    let expected = trigamma(residual_df as f64 / 2.0);
    ((var_log - expected).max(MIN_PRIOR_VAR), var_log)
}

/// MAP estimate for one gene
pub(super) fn fit_map_dispersion(
    gene: &GeneData<'_>,
    gene_disp: f64,
    trend_disp: f64,
    prior_var: f64,
    max_disp: f64,
    params: &DispersionParams,
) -> f64 {
    let prior = Some(LogNormalPrior {
        mean: trend_disp.ln(),
        var: prior_var,
    });
    let start = gene_disp.clamp(params.min_disp, max_disp).ln();
    let search = armijo_line_search(gene, start, prior, (params.min_disp / 10.0).ln(), params);
    let converged = search.iterations < params.maxit && search.iterations != 1;
    let alpha = if converged {
        search.log_alpha.exp()
    } else {
        grid_search(gene, prior, params.min_disp, max_disp)
    };
    alpha.clamp(params.min_disp, max_disp)
}

/// Shrink every gene-wise estimate toward the trend.
///
/// Genes whose gene-wise estimate lies more than `outlier_sd` standard
/// deviations above the trend (on the log scale) keep the gene-wise value
/// and are flagged as dispersion outliers.
pub fn estimate_map_dispersions(dds: &mut DESeqDataSet, params: &DispersionParams) -> Result<()> {
    let missing = |what: &str| PipelineError::DispersionEstimationFailed {
        gene_id: "N/A".to_string(),
        reason: format!("{} required for MAP estimation", what),
    };
    let gene = dds.gene_dispersions().ok_or_else(|| missing("gene-wise dispersions"))?.clone();
    let trend = dds.trended_dispersions().ok_or_else(|| missing("trended dispersions"))?.clone();
    let design = DispersionDesign::from_dataset(dds)?;
    let nf = dds.normalization_matrix()?;

    let (prior_var, var_log) =
        estimate_prior_variance(&gene.to_vec(), &trend.to_vec(), design.residual_df(), params.min_disp);
    log::info!("Dispersion prior variance {:.4} (varLogDispEsts {:.4})", prior_var, var_log);
    dds.set_dispersion_prior_var(prior_var);
    dds.set_var_log_disp_ests(var_log);

    let counts = dds.counts().counts();
    let max_disp = design.max_disp();
    let threshold = params.outlier_sd * var_log.sqrt();

    let fitted: Vec<(f64, bool)> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            let (g, t) = (gene[i], trend[i]);
            if !g.is_finite() || !(t > 0.0) {
                return (f64::NAN, false);
            }
            if g.ln() - t.ln() > threshold {
                return (g, true);
            }
            let k = counts.row(i).to_vec();
            let mu = linear_model_mu(counts.row(i), nf.row(i), &design);
            let data = GeneData {
                counts: &k,
                mu: &mu,
                x: &design.x,
            };
            (fit_map_dispersion(&data, g, t, prior_var, max_disp, params), false)
        })
        .collect();

    let (map, outliers): (Vec<f64>, Vec<bool>) = fitted.into_iter().unzip();
    let n_outliers = outliers.iter().filter(|&&o| o).count();
    log::info!("{} dispersion outliers keep their gene-wise estimate", n_outliers);
    dds.set_dispersion_outliers(outliers);
    dds.set_map_dispersions(Array1::from_vec(map))
}
