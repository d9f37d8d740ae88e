//! Mean-dispersion trend

use ndarray::Array1;

use crate::data::DESeqDataSet;
use crate::error::{PipelineError, Result};
use crate::stats::trimmed_mean;

/// Which trend was fitted
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrendFit {
    /// alpha(mu) = asympt_disp + extra_pois / mu
    Parametric { asympt_disp: f64, extra_pois: f64 },
    /// One dispersion for every gene
    Mean(f64),
}

impl TrendFit {
    /// Trend stored on a dataset: the parametric coefficients when present,
    /// otherwise the constant trended value
    pub fn from_dataset(dds: &DESeqDataSet) -> Option<Self> {
        if let Some((asympt_disp, extra_pois)) = dds.dispersion_function() {
            return Some(TrendFit::Parametric { asympt_disp, extra_pois });
        }
        let trended = dds.trended_dispersions()?;
        let mean = crate::stats::median(&trended.to_vec());
        (mean > 0.0).then_some(TrendFit::Mean(mean))
    }

    pub fn predict(&self, mean: f64) -> f64 {
        match *self {
            TrendFit::Parametric { asympt_disp, extra_pois } => {
                if mean > 0.0 {
                    asympt_disp + extra_pois / mean
                } else {
                    asympt_disp
                }
            }
            TrendFit::Mean(d) => d,
        }
    }
}

/// Fit the trend to the gene-wise estimates and store the trended values.
///
/// The parametric fit is tried first. When it fails the trimmed mean of the
/// estimates above `100 * min_disp` is used instead, and no dispersion
/// function is recorded on the dataset.
pub fn fit_dispersion_trend(dds: &mut DESeqDataSet, min_disp: f64) -> Result<TrendFit> {
    let gene = dds
        .gene_dispersions()
        .ok_or_else(|| PipelineError::TrendFittingFailed {
            reason: "gene-wise dispersions must be estimated first".to_string(),
        })?
        .clone();
    let means = dds.base_means()?;

    let usable: Vec<(f64, f64)> = means
        .iter()
        .zip(gene.iter())
        .filter(|(m, d)| **m > 0.0 && d.is_finite() && **d >= 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();

    let fit = match fit_parametric(&usable) {
        Ok((asympt_disp, extra_pois)) => {
            log::info!("Dispersion trend: asymptDisp = {:.4}, extraPois = {:.4}", asympt_disp, extra_pois);
            dds.set_dispersion_function(asympt_disp, extra_pois);
            TrendFit::Parametric { asympt_disp, extra_pois }
        }
        Err(e) => {
            let values: Vec<f64> = usable.iter().map(|p| p.1).collect();
            let mean = trimmed_mean(&values, 0.001);
            if !mean.is_finite() {
                return Err(PipelineError::TrendFittingFailed {
                    reason: format!("{}; no gene-wise estimates above the minimum for a mean fit", e),
                });
            }
            log::warn!("{}; using the mean dispersion {:.4} instead", e, mean);
            TrendFit::Mean(mean)
        }
    };

    let trended = means.mapv(|m| fit.predict(m));
    dds.set_trended_dispersions(trended)?;
    Ok(fit)
}

/// Gamma-family GLM with identity link, `disp ~ 1 + 1/mean`, refitted on
/// genes whose residual ratio lies in (1e-4, 15).
fn fit_parametric(data: &[(f64, f64)]) -> Result<(f64, f64)> {
    let fail = |reason: String| Err(PipelineError::TrendFittingFailed { reason });
    let mut coefs = (0.1, 1.0);

    for iter in 0..10 {
        let kept: Vec<(f64, f64)> = data
            .iter()
            .copied()
            .filter(|&(m, d)| {
                let ratio = d / (coefs.0 + coefs.1 / m);
                ratio > 1e-4 && ratio < 15.0
            })
            .collect();
        if kept.len() < 3 {
            return fail(format!("only {} genes left for the parametric trend", kept.len()));
        }

        let old = coefs;
        let (next, glm_converged) = gamma_identity_glm(&kept, coefs);
        coefs = next;
        log::debug!(
            "trend iteration {}: {} genes, a0 = {:.6}, a1 = {:.6}",
            iter + 1,
            kept.len(),
            coefs.0,
            coefs.1
        );

        if !(coefs.0 > 0.0 && coefs.1 > 0.0) {
            return fail(format!(
                "parametric trend coefficients are not positive (a0 = {:.4}, a1 = {:.4})",
                coefs.0, coefs.1
            ));
        }
        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if change < 1e-6 && glm_converged {
            return Ok(coefs);
        }
    }
    fail("parametric trend did not converge".to_string())
}

/// IRLS for the two-coefficient Gamma GLM; returns the coefficients and
/// whether the deviance settled.
fn gamma_identity_glm(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let deviance = |(a0, a1): (f64, f64)| -> f64 {
        data.iter()
            .map(|&(m, d)| {
                let mu = (a0 + a1 / m).max(1e-8);
                2.0 * (-(d / mu).ln() + (d - mu) / mu)
            })
            .sum()
    };

    let mut coefs = start;
    let mut dev_old = deviance(coefs);
    for _ in 0..25 {
        let (mut sw, mut swx, mut swxx, mut swy, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(m, d) in data {
            let x = 1.0 / m;
            let mu = (coefs.0 + coefs.1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swxx += w * x * x;
            swy += w * d;
            swxy += w * x * d;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-12 {
            return (coefs, false);
        }
        coefs = ((swxx * swy - swx * swxy) / det, (sw * swxy - swx * swy) / det);

        let dev = deviance(coefs);
        if (dev_old - dev).abs() / (dev.abs() + 0.1) < 1e-8 {
            return (coefs, true);
        }
        dev_old = dev;
    }
    (coefs, false)
}

/// Trend predictions for arbitrary means; used by reports
pub fn trend_curve(fit: &TrendFit, means: &[f64]) -> Array1<f64> {
    means.iter().map(|&m| fit.predict(m)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_exact_trend() {
        let data: Vec<(f64, f64)> = (1..200)
            .map(|i| {
                let m = i as f64 * 5.0;
                (m, 0.05 + 2.0 / m)
            })
            .collect();
        let (a0, a1) = fit_parametric(&data).unwrap();
        assert!((a0 - 0.05).abs() < 1e-4, "a0 = {}", a0);
        assert!((a1 - 2.0).abs() < 1e-3, "a1 = {}", a1);
    }

    #[test]
    fn test_too_few_points_fails() {
        assert!(fit_parametric(&[(1.0, 0.1), (2.0, 0.1)]).is_err());
    }

    #[test]
    fn test_predict() {
        let p = TrendFit::Parametric { asympt_disp: 0.1, extra_pois: 2.0 };
        assert!((p.predict(4.0) - 0.6).abs() < 1e-12);
        assert_eq!(p.predict(0.0), 0.1);
        assert_eq!(TrendFit::Mean(0.3).predict(100.0), 0.3);
        assert!((trend_curve(&p, &[2.0])[0] - 1.1).abs() < 1e-12);
    }
}
