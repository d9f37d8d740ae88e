//! Normal-prior shrinkage of log2 fold changes
//!
//! The prior variance of each non-intercept coefficient is matched to the
//! weighted upper quantile of the MLE log2 fold changes; the GLM is then
//! refitted with a ridge of `1 / prior_var` on that coefficient. Only the
//! `*_shrunk` columns are written: the Wald statistic and p-values keep
//! coming from the MLE.

use std::f64::consts::{LN_2, LOG2_E};

use crate::data::DESeqDataSet;
use crate::error::{PipelineError, Result};
use crate::glm::{get_contrast_index, refit_glm_with_prior, DesignInfo, GlmFitParams};
use crate::io::DESeqResults;
use crate::stats::match_weighted_upper_quantile_for_variance;

/// Upper quantile used to match the prior variance
pub const DEFAULT_UPPER_QUANTILE: f64 = 0.05;

/// Coefficients at or above this |log2 FC| do not inform the prior
const MAX_PRIOR_LFC: f64 = 10.0;

/// Per-coefficient prior variances on the log2 scale; the intercept gets
/// an effectively flat prior.
pub fn beta_prior_variances(dds: &DESeqDataSet, upper_quantile: f64) -> Result<Vec<f64>> {
    let missing = |what: &str| PipelineError::InvalidInput {
        reason: format!("{} required for LFC shrinkage", what),
    };
    let coefficients = dds.coefficients().ok_or_else(|| missing("GLM coefficients"))?;
    let trended = dds.trended_dispersions().ok_or_else(|| missing("trended dispersions"))?;
    let base_means = dds.base_means()?;

    // varlogk = 1/baseMean + trend
    let informative: Vec<(usize, f64)> = base_means
        .iter()
        .zip(trended.iter())
        .enumerate()
        .filter(|(_, (m, t))| **m > 0.0 && t.is_finite())
        .map(|(i, (m, t))| (i, 1.0 / (1.0 / m + t)))
        .collect();

    let mut prior_var = vec![1e6; coefficients.ncols()];
    for (k, var) in prior_var.iter_mut().enumerate().skip(1) {
        let (betas, weights): (Vec<f64>, Vec<f64>) = informative
            .iter()
            .map(|&(i, w)| (coefficients[[i, k]] * LOG2_E, w))
            .filter(|(b, _)| b.is_finite() && b.abs() < MAX_PRIOR_LFC)
            .unzip();
        if !betas.is_empty() {
            *var = match_weighted_upper_quantile_for_variance(&betas, &weights, upper_quantile);
        }
    }
    Ok(prior_var)
}

/// Fill `log2_fold_changes_shrunk` and `lfc_se_shrunk` for the contrast of
/// `results`.
pub fn shrink_lfc_normal(
    dds: &DESeqDataSet,
    design_info: &DesignInfo,
    results: &mut DESeqResults,
    upper_quantile: f64,
) -> Result<()> {
    let contrast = &results.contrast;
    let (coef, sign) = get_contrast_index(design_info, &contrast.numerator, &contrast.denominator)?;
    let prior_var = beta_prior_variances(dds, upper_quantile)?;
    log::info!("LFC prior variance for {}: {:.4}", design_info.coef_names[coef], prior_var[coef]);

    let ln2_sq = LN_2 * LN_2;
    let mut lambda: Vec<f64> = prior_var.iter().map(|v| 1.0 / v / ln2_sq).collect();
    lambda[0] = 1e-6 / ln2_sq;

    let (coefs, se) = refit_glm_with_prior(dds, &lambda, &GlmFitParams::default())?;
    for i in 0..results.n_genes() {
        if results.base_means[i] == 0.0 {
            results.log2_fold_changes_shrunk[i] = 0.0;
            results.lfc_se_shrunk[i] = 0.0;
        } else {
            results.log2_fold_changes_shrunk[i] = sign * coefs[[i, coef]] / LN_2;
            results.lfc_se_shrunk[i] = se[[i, coef]] / LN_2;
        }
    }
    Ok(())
}
