//! Hypothesis testing and multiple-testing correction

mod fdr;
mod pvalue;
mod wald;

pub use fdr::benjamini_hochberg;
pub use pvalue::calculate_pvalue;
pub use wald::wald_test;

use crate::data::DESeqDataSet;
use crate::error::Result;
use crate::filter::independent_filtering;
use crate::glm::DesignInfo;
use crate::io::{Contrast, DESeqResults};

/// Wald test followed by independent filtering at `alpha`
pub fn results(
    dds: &DESeqDataSet,
    design_info: &DesignInfo,
    contrast: Contrast,
    alpha: f64,
) -> Result<DESeqResults> {
    let mut res = wald_test(dds, design_info, contrast, alpha)?;
    independent_filtering(&mut res, alpha);
    Ok(res)
}

/// Coefficient names of the fitted design
pub fn results_names(dds: &DESeqDataSet) -> Option<Vec<String>> {
    dds.design_column_names().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::dispersion::{estimate_dispersions, DispersionParams};
    use crate::glm::{fit_glm, GlmFitParams};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use ndarray::Array2;

    /// Per-sample spread well above Poisson noise. Each group sees every
    /// factor once, so group means keep the injected ratio.
    const SPREAD: [f64; 3] = [0.7, 1.0, 1.4];

    fn fitted_dataset() -> (DESeqDataSet, DesignInfo) {
        let n_genes = 60;
        let samples: Vec<String> = (1..=6).map(|i| format!("s{}", i)).collect();
        let counts = Array2::from_shape_fn((n_genes, 6), |(g, s)| {
            let base = 20.0 + 15.0 * g as f64;
            let jitter = SPREAD[(s % 3 + g + s / 3) % 3];
            let effect = if s >= 3 && g % 4 == 0 { 4.0 } else { 1.0 };
            (base * jitter * effect).round()
        });
        let genes = (0..n_genes).map(|g| format!("g{}", g)).collect();
        let matrix = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples).unwrap();
        meta.add_column(
            "condition",
            ["chunk", "chunk", "chunk", "dissociated", "dissociated", "dissociated"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap();
        meta.relevel("condition", "chunk").unwrap();

        let mut dds = DESeqDataSet::new(matrix, meta, "condition").unwrap();
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        estimate_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        let info = fit_glm(&mut dds, &GlmFitParams::default()).unwrap();
        (dds, info)
    }

    fn contrast() -> Contrast {
        Contrast {
            variable: "condition".into(),
            numerator: "dissociated".into(),
            denominator: "chunk".into(),
        }
    }

    #[test]
    fn fdr_005_subset_of_fdr_01() {
        let (dds, info) = fitted_dataset();
        let table = results(&dds, &info, contrast(), 0.1).unwrap();
        let loose = table.significant_genes(0.1);
        let strict = table.significant_genes(0.05);
        assert!(!strict.is_empty());
        assert!(strict.len() <= loose.len());
        for g in &strict {
            assert!(loose.contains(g), "{} significant at 0.05 but not at 0.1", g);
        }

        let rerun = results(&dds, &info, contrast(), 0.05).unwrap();
        assert_eq!(rerun.alpha, 0.05);
        assert_eq!(rerun.log2_fold_changes, table.log2_fold_changes);
    }

    #[test]
    fn test_reversed_contrast_flips_sign() {
        let (dds, info) = fitted_dataset();
        let fwd = wald_test(&dds, &info, contrast(), 0.1).unwrap();
        let rev = Contrast {
            variable: "condition".into(),
            numerator: "chunk".into(),
            denominator: "dissociated".into(),
        };
        let back = wald_test(&dds, &info, rev, 0.1).unwrap();
        for i in 0..fwd.n_genes() {
            assert!((fwd.log2_fold_changes[i] + back.log2_fold_changes[i]).abs() < 1e-12);
            assert!((fwd.pvalues[i] - back.pvalues[i]).abs() < 1e-12);
        }
        assert!(fwd.log2_fold_changes[0] > 1.5);
        assert!(fwd.log2_fold_changes[1].abs() < 0.5);
    }

    #[test]
    fn test_unknown_level_rejected() {
        let (dds, info) = fitted_dataset();
        let bad = Contrast {
            variable: "condition".into(),
            numerator: "frozen".into(),
            denominator: "chunk".into(),
        };
        assert!(wald_test(&dds, &info, bad, 0.1).is_err());
        assert_eq!(results_names(&dds).unwrap().len(), 2);
    }
}
