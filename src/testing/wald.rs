//! Wald test for a two-level contrast

use std::f64::consts::LN_2;

use super::fdr::benjamini_hochberg;
use super::pvalue::calculate_pvalue;
use crate::data::DESeqDataSet;
use crate::error::{PipelineError, Result};
use crate::glm::{get_contrast_index, DesignInfo};
use crate::io::{Contrast, DESeqResults};

/// Per-gene Wald statistics for `contrast` on a fitted dataset.
///
/// Coefficients are moved from natural-log to log2 scale. Genes with a zero
/// baseMean report LFC 0, SE 0 and no p-value. `padj` here is plain BH over
/// all tested genes; [`super::results`] replaces it after independent
/// filtering.
pub fn wald_test(
    dds: &DESeqDataSet,
    design_info: &DesignInfo,
    contrast: Contrast,
    alpha: f64,
) -> Result<DESeqResults> {
    let not_fitted = |what: &str| PipelineError::InvalidContrast {
        reason: format!("{} not available; fit the GLM before testing", what),
    };
    let coefficients = dds.coefficients().ok_or_else(|| not_fitted("coefficients"))?;
    let standard_errors = dds.standard_errors().ok_or_else(|| not_fitted("standard errors"))?;
    if contrast.variable != design_info.variable {
        return Err(PipelineError::InvalidContrast {
            reason: format!(
                "contrast variable '{}' is not the design variable '{}'",
                contrast.variable, design_info.variable
            ),
        });
    }
    let (coef, sign) = get_contrast_index(design_info, &contrast.numerator, &contrast.denominator)?;

    let mut res = DESeqResults::new(dds.counts().gene_ids().to_vec(), contrast, alpha);
    res.base_means = dds.base_means()?.to_vec();
    res.base_vars = dds.base_vars()?.to_vec();
    if let Some(disp) = dds.dispersions() {
        res.dispersions = disp.to_vec();
    }

    for i in 0..dds.n_genes() {
        if res.base_means[i] == 0.0 {
            res.log2_fold_changes[i] = 0.0;
            res.lfc_se[i] = 0.0;
            continue;
        }
        let beta = sign * coefficients[[i, coef]];
        let se = standard_errors[[i, coef]];
        res.log2_fold_changes[i] = beta / LN_2;
        res.lfc_se[i] = se / LN_2;
        res.stat[i] = if se > 0.0 && se.is_finite() { beta / se } else { f64::NAN };
        res.pvalues[i] = calculate_pvalue(res.stat[i]);
    }
    res.padj = benjamini_hochberg(&res.pvalues);

    log::info!(
        "Wald test {}: {} of {} genes tested",
        res.contrast,
        res.pvalues.iter().filter(|p| p.is_finite()).count(),
        res.n_genes()
    );
    Ok(res)
}
