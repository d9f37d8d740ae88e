//! Variance stabilizing transformation
//!
//! Uses the dispersion trend of the fitted model (not a blind refit). With a
//! parametric trend `a0 + a1/mu` the closed form of the integral of
//! `1/sqrt(mu + a(mu) mu^2)` is used; with a constant trend the asinh form.

use ndarray::Array2;

use crate::data::DESeqDataSet;
use crate::error::{PipelineError, Result};
use crate::stats::median;

/// Which closed form produced the values
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VstMethod {
    Parametric { asympt_disp: f64, extra_pois: f64 },
    Mean(f64),
}

impl VstMethod {
    /// Transform one normalized count
    pub fn apply(&self, q: f64) -> f64 {
        match *self {
            VstMethod::Parametric { asympt_disp: a0, extra_pois: a1 } => {
                let root = (a0 * q * (1.0 + a1 + a0 * q)).sqrt();
                ((1.0 + a1 + 2.0 * a0 * q + 2.0 * root) / (4.0 * a0)).log2()
            }
            VstMethod::Mean(alpha) => {
                (2.0 * (alpha * q).sqrt().asinh() - alpha.ln() - 4f64.ln()) / std::f64::consts::LN_2
            }
        }
    }
}

/// Transformed matrix with its labels
#[derive(Debug, Clone)]
pub struct VstResult {
    /// Genes x samples
    pub data: Array2<f64>,
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub method: VstMethod,
}

/// Pick the closed form from the dataset's trend
pub fn vst_method(dds: &DESeqDataSet) -> Result<VstMethod> {
    if let Some((asympt_disp, extra_pois)) = dds.dispersion_function() {
        return Ok(VstMethod::Parametric { asympt_disp, extra_pois });
    }
    let trended = dds.trended_dispersions().ok_or_else(|| PipelineError::InvalidInput {
        reason: "VST needs the dispersion trend; estimate dispersions first".to_string(),
    })?;
    let alpha = median(&trended.to_vec());
    if !(alpha > 0.0) {
        return Err(PipelineError::InvalidInput {
            reason: format!("mean dispersion {} is not positive", alpha),
        });
    }
    Ok(VstMethod::Mean(alpha))
}

/// VST of the dataset's counts normalized by its size or normalization
/// factors
pub fn vst(dds: &DESeqDataSet) -> Result<VstResult> {
    let method = vst_method(dds)?;
    let mut data = dds.normalized_counts()?;
    data.mapv_inplace(|q| method.apply(q));
    log::info!("VST ({:?}) of {} genes x {} samples", method, dds.n_genes(), dds.n_samples());
    Ok(VstResult {
        data,
        gene_ids: dds.counts().gene_ids().to_vec(),
        sample_ids: dds.counts().sample_ids().to_vec(),
        method,
    })
}
