//! dissoc_de: differential expression and gene-set enrichment for
//! dissociation-effect RNA-seq studies
//!
//! Real bulk samples are loaded from STAR gene-count files, optionally
//! combined with pseudobulk columns, normalized (size factors or GC/length
//! normalization factors) and tested with a negative binomial GLM.
//!
//! # Example
//!
//! ```ignore
//! use dissoc_de::prelude::*;
//!
//! let config = Config::load(Path::new("dissoc.toml"))?;
//! let outcome = run_bulk_comparison(&config)?;
//! run_report(&config, &outcome.comparison)?;
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod enrichment;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod normalization;
pub mod pipeline;
pub mod report;
pub mod shrinkage;
pub mod stats;
pub mod testing;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::data::{CountMatrix, DESeqDataSet, SampleMetadata};
    pub use crate::dispersion::{estimate_dispersions, DispersionParams, TrendFit};
    pub use crate::enrichment::{run_gsea, GseaParams, GseaResults, RankedList};
    pub use crate::error::{PipelineError, Result};
    pub use crate::filter::{filter_min_total_reads, independent_filtering};
    pub use crate::glm::{fit_glm, DesignInfo, GlmFitParams};
    pub use crate::io::{
        load_results, read_count_matrix, read_star_samples, save_results, Contrast, DESeqResults,
    };
    pub use crate::normalization::{cqn_normalization_factors, estimate_size_factors, SizeFactorMethod};
    pub use crate::pipeline::{run_bulk_comparison, run_enrichment, run_pseudobulk_comparison, run_report};
    pub use crate::shrinkage::shrink_lfc_normal;
    pub use crate::testing::{benjamini_hochberg, results, results_names, wald_test};
    pub use crate::transform::{vst, VstMethod, VstResult};
}

use prelude::*;

/// Normalize (unless size factors or normalization factors are already set),
/// estimate dispersions and fit the GLM.
pub fn run_deseq(dds: &mut DESeqDataSet) -> Result<DesignInfo> {
    if !dds.has_normalization() {
        estimate_size_factors(dds, SizeFactorMethod::Ratio)?;
    }
    let trend = estimate_dispersions(dds, &DispersionParams::default())?;
    log::debug!("dispersion trend: {:?}", trend);
    fit_glm(dds, &GlmFitParams::default())
}

/// `numerator` vs `denominator` of the design variable at FDR `alpha`
pub fn deseq_results(
    dds: &DESeqDataSet,
    design_info: &DesignInfo,
    numerator: &str,
    denominator: &str,
    alpha: f64,
) -> Result<DESeqResults> {
    let contrast = Contrast {
        variable: dds.design_variable().to_string(),
        numerator: numerator.to_string(),
        denominator: denominator.to_string(),
    };
    results(dds, design_info, contrast, alpha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn injected_fold_change_detected() {
        // g1 is ~8x up in the dissociated pair, the rest are flat with noise
        let counts = CountMatrix::new(
            array![
                [100.0, 130.0, 820.0, 950.0],
                [500.0, 420.0, 470.0, 540.0],
                [200.0, 260.0, 240.0, 190.0],
                [900.0, 1000.0, 880.0, 1050.0],
            ],
            (1..=4).map(|i| format!("g{}", i)).collect(),
            (1..=4).map(|i| format!("s{}", i)).collect(),
        )
        .unwrap();
        let mut metadata = SampleMetadata::new((1..=4).map(|i| format!("s{}", i)).collect()).unwrap();
        metadata
            .add_column(
                "condition",
                ["chunk", "chunk", "dissociated", "dissociated"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            )
            .unwrap();

        let mut dds = DESeqDataSet::new(counts, metadata, "condition").unwrap();
        let design_info = run_deseq(&mut dds).unwrap();
        let loose = deseq_results(&dds, &design_info, "dissociated", "chunk", 0.1).unwrap();

        assert_eq!(loose.n_genes(), 4);
        assert!(loose.log2_fold_changes[0] > 0.0);
        assert!(loose.padj[0] < 0.1, "padj = {}", loose.padj[0]);

        let strict = deseq_results(&dds, &design_info, "dissociated", "chunk", 0.05).unwrap();
        let loose_hits = loose.significant_genes(0.1);
        assert!(strict.significant_genes(0.05).iter().all(|g| loose_hits.contains(g)));
    }
}
