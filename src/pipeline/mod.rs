//! End-to-end pipelines: real bulk comparison, real vs pseudobulk
//! comparison, downstream GSEA and downstream reports.
//!
//! Each pipeline is one forward pass. Large matrices are moved into the next
//! stage or dropped as soon as that stage owns its inputs.

use std::path::PathBuf;

use crate::config::Config;
use crate::data::{
    assemble, restrict_to_common_genes, CountMatrix, DESeqDataSet, PseudobulkLabels, SampleMetadata,
    NA_LEVEL,
};
use crate::dispersion::TrendFit;
use crate::enrichment::{run_gsea, write_gsea_tables, GseaParams, GseaResults, RankedList};
use crate::error::{PipelineError, Result};
use crate::filter::{filter_min_total_reads, FilterReport};
use crate::io::{
    load_annotation, load_model, load_results, read_count_matrix, read_gmt, read_star_samples,
    save_model, save_results, Contrast, DESeqResults, GeneAnnotation, ModelArtifact,
};
use crate::normalization::cqn_normalization_factors;
use crate::report;
use crate::shrinkage::{shrink_lfc_normal, DEFAULT_UPPER_QUANTILE};
use crate::testing::results;
use crate::transform::vst;

/// What a comparison pipeline produced
#[derive(Debug, Clone)]
pub struct ComparisonOutcome {
    pub comparison: String,
    pub contrast: Contrast,
    pub filter: FilterReport,
    /// One table per configured FDR threshold, in configuration order
    pub results: Vec<DESeqResults>,
    pub model_dir: PathBuf,
    pub results_dirs: Vec<PathBuf>,
}

/// Files written by [`run_report`]
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Configured samples as metadata with `condition` and `pool` columns
pub fn sample_metadata(config: &Config) -> Result<SampleMetadata> {
    let mut meta = SampleMetadata::new(config.sample_ids())?;
    meta.add_column("condition", config.samples.iter().map(|s| s.condition.clone()).collect())?;
    meta.add_column(
        "pool",
        config
            .samples
            .iter()
            .map(|s| s.pool.clone().unwrap_or_else(|| NA_LEVEL.to_string()))
            .collect(),
    )?;
    Ok(meta)
}

fn load_real_samples(config: &Config) -> Result<(CountMatrix, SampleMetadata)> {
    let files: Vec<(String, PathBuf)> = config
        .samples
        .iter()
        .map(|s| (s.id.clone(), config.star.sample_path(&config.paths.base_data, &s.id)))
        .collect();
    let counts = read_star_samples(&files, config.star.count_column, config.star.preamble_rows)?;
    Ok((counts, sample_metadata(config)?))
}

fn configured_annotation(config: &Config) -> Result<GeneAnnotation> {
    load_annotation(config.annotation.gtf.as_deref(), config.annotation.table.as_deref())
}

fn contrast(config: &Config, numerator: &str) -> Contrast {
    Contrast {
        variable: config.comparison.variable.clone(),
        numerator: numerator.to_string(),
        denominator: config.comparison.reference.clone(),
    }
}

/// Fit, test at every threshold, shrink and persist
fn fit_and_persist(
    config: &Config,
    mut dds: DESeqDataSet,
    contrast: Contrast,
    filter: FilterReport,
) -> Result<ComparisonOutcome> {
    let name = config.comparison.name.clone();
    let design_info = crate::run_deseq(&mut dds)?;

    let mut tables = Vec::with_capacity(config.comparison.fdr_thresholds.len());
    let mut results_dirs = Vec::new();
    for &alpha in &config.comparison.fdr_thresholds {
        let mut res = results(&dds, &design_info, contrast.clone(), alpha)?;
        if config.comparison.shrink {
            shrink_lfc_normal(&dds, &design_info, &mut res, DEFAULT_UPPER_QUANTILE)?;
        }
        log::info!("{} at FDR {}:\n{}", name, alpha, res.summary());
        let dir = config.results_dir(&name, alpha);
        save_results(&dir, &name, &res)?;
        results_dirs.push(dir);
        tables.push(res);
    }

    let model_dir = config.model_dir(&name);
    save_model(&model_dir, &ModelArtifact::from_dataset(&dds, &name, &contrast)?)?;
    log::info!("Model for {} written to {}", name, model_dir.display());

    Ok(ComparisonOutcome {
        comparison: name,
        contrast,
        filter,
        results: tables,
        model_dir,
        results_dirs,
    })
}

/// Real bulk samples only: `numerator` vs `reference` of the configured
/// variable, size-factor normalization.
pub fn run_bulk_comparison(config: &Config) -> Result<ComparisonOutcome> {
    let cmp = &config.comparison;
    log::info!("Bulk comparison '{}': {} vs {}", cmp.name, cmp.numerator, cmp.reference);

    let (counts, mut meta) = load_real_samples(config)?;
    meta.relevel(&cmp.variable, &cmp.reference)?;
    let (filtered, filter) = filter_min_total_reads(&counts, cmp.min_total_reads)?;
    drop(counts);

    let dds = DESeqDataSet::new(filtered, meta, &cmp.variable)?;
    fit_and_persist(config, dds, contrast(config, &cmp.numerator), filter)
}

/// Real samples plus pseudobulk columns with GC/length normalization factors.
///
/// The pseudobulk condition is tested against the configured reference.
pub fn run_pseudobulk_comparison(config: &Config) -> Result<ComparisonOutcome> {
    let cmp = &config.comparison;
    let matrix_path = config.pseudobulk.matrix.as_ref().ok_or_else(|| PipelineError::InvalidInput {
        reason: "pseudobulk.matrix is not configured".to_string(),
    })?;
    log::info!(
        "Pseudobulk comparison '{}': {} vs {}",
        cmp.name,
        config.pseudobulk.condition,
        cmp.reference
    );

    let (real, real_meta) = load_real_samples(config)?;
    let pseudo = read_count_matrix(matrix_path)?;
    let (real, pseudo) = restrict_to_common_genes(&real, &pseudo)?;
    let labels = PseudobulkLabels {
        condition_column: cmp.variable.clone(),
        condition: config.pseudobulk.condition.clone(),
        pool: config.pseudobulk.pool.clone(),
    };
    let (combined, mut meta) = assemble(&real, &real_meta, &pseudo, &labels)?;
    drop((real, pseudo));
    meta.relevel(&cmp.variable, &cmp.reference)?;

    let (filtered, filter) = filter_min_total_reads(&combined, cmp.min_total_reads)?;
    drop(combined);

    let annotation = configured_annotation(config)?;
    let aligned = annotation.align(filtered.gene_ids());
    drop(annotation);
    let cqn = cqn_normalization_factors(&filtered, &aligned)?;
    log::info!(
        "GC/length factors: {} genes in the regression, {} with library size only",
        cqn.n_annotated(),
        cqn.n_excluded()
    );

    let mut dds = DESeqDataSet::new(filtered, meta, &cmp.variable)?;
    dds.set_normalization_factors(cqn.factors)?;
    fit_and_persist(config, dds, contrast(config, &config.pseudobulk.condition), filter)
}

fn first_threshold(config: &Config) -> Result<f64> {
    config
        .comparison
        .fdr_thresholds
        .first()
        .copied()
        .ok_or_else(|| PipelineError::InvalidInput {
            reason: "no FDR threshold configured".to_string(),
        })
}

/// GSEA on the persisted table of the first (loosest) FDR threshold
pub fn run_enrichment(config: &Config, comparison: &str) -> Result<GseaResults> {
    let alpha = first_threshold(config)?;
    let table = load_results(&config.results_dir(comparison, alpha))?;
    let ranked = RankedList::from_results(&table, config.gsea.alpha)?;
    drop(table);

    let gmt = config.gsea.gmt.as_ref().ok_or_else(|| PipelineError::InvalidInput {
        reason: "gsea.gmt is not configured".to_string(),
    })?;
    let sets = read_gmt(gmt)?;
    let res = run_gsea(&ranked, &sets, &GseaParams::from(&config.gsea))?;
    write_gsea_tables(&config.gsea_dir(comparison), &res, config.gsea.top_n)?;
    Ok(res)
}

/// Tables and figures for a persisted comparison
pub fn run_report(config: &Config, comparison: &str) -> Result<ReportOutcome> {
    let alpha = first_threshold(config)?;
    let table = load_results(&config.results_dir(comparison, alpha))?;
    let model = load_model(&config.model_dir(comparison))?;
    let annotation = configured_annotation(config)?;
    let aligned = annotation.align(&table.gene_ids);
    drop(annotation);

    let dir = config.report_dir(comparison);
    std::fs::create_dir_all(&dir)?;
    let mut files = Vec::new();

    let (up, down) = report::write_top_tables(&dir, &table, &aligned, config.report.top_n)?;
    files.extend([up, down]);

    let path = dir.join("volcano.svg");
    report::volcano_plot(&path, &table, &aligned)?;
    files.push(path);

    let conditions: Vec<String> = model
        .metadata
        .column(&model.contrast.variable)
        .map(|c| c.to_vec())
        .unwrap_or_default();
    let base_means = model.base_means.clone();
    let gene_dispersions = model.gene_dispersions.clone();
    let dds = model.into_dataset()?;
    let trend = TrendFit::from_dataset(&dds);
    let transformed = vst(&dds)?;
    drop(dds);

    let pca = report::pca(&transformed, config.report.pca_top_genes)?;
    report::write_pca_tsv(&dir.join("pca.tsv"), &pca, &conditions)?;
    report::pca_plot(&dir.join("pca.svg"), &pca, &conditions)?;
    files.push(dir.join("pca.tsv"));
    files.push(dir.join("pca.svg"));

    let distances = report::sample_distances(&transformed);
    let (tsv, svg) = (dir.join("sample_distances.tsv"), dir.join("sample_distances.svg"));
    report::write_distances_tsv(&tsv, &distances, &transformed.sample_ids)?;
    report::distance_heatmap(&svg, &distances, &transformed.sample_ids)?;
    files.extend([tsv, svg]);
    drop(transformed);

    let path = dir.join("mean_variance.svg");
    report::mean_variance_plot(&path, &base_means, &gene_dispersions, trend.as_ref())?;
    files.push(path);

    let log_lengths: Vec<Option<f64>> = aligned
        .lengths()
        .into_iter()
        .map(|l| l.filter(|l| *l > 0.0).map(f64::log10))
        .collect();
    let width = config.report.fc_bin_width;
    let path = dir.join("fc_bins_length.svg");
    let drawn = report::fc_bin_boxplot(
        &path,
        "Gene length by fold change",
        "log10 length",
        &table.log2_fold_changes,
        &log_lengths,
        width,
    )?;
    if drawn > 0 {
        files.push(path);
    }
    let path = dir.join("fc_bins_gc.svg");
    let drawn = report::fc_bin_boxplot(
        &path,
        "GC content by fold change",
        "GC fraction",
        &table.log2_fold_changes,
        &aligned.gc(),
        width,
    )?;
    if drawn > 0 {
        files.push(path);
    }

    log::info!("Report for {}: {} files in {}", comparison, files.len(), dir.display());
    Ok(ReportOutcome { dir, files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SampleConfig;
    use std::fs;
    use std::path::Path;

    const N_GENES: usize = 80;

    fn count(gene: usize, sample: usize) -> u64 {
        let base = 30.0 + 12.0 * gene as f64;
        // overdispersed, and each condition sees every factor once
        let jitter = [0.7, 1.0, 1.4][(sample % 3 + gene + sample / 3) % 3];
        let effect = if sample >= 3 && gene % 5 == 0 { 6.0 } else { 1.0 };
        (base * jitter * effect).round() as u64
    }

    fn write_star(dir: &Path, sample: &str, column: usize) {
        let mut text = String::from("N_unmapped\t10\t10\t10\nN_multimapping\t5\t5\t5\n");
        text.push_str("N_noFeature\t1\t1\t1\nN_ambiguous\t0\t0\t0\n");
        for g in 0..N_GENES {
            let c = count(g, column);
            text.push_str(&format!("ENSG{:05}\t{}\t0\t{}\n", g, c, c));
        }
        text.push_str("ENSG99999\t0\t0\t0\n");
        let sample_dir = dir.join(sample);
        fs::create_dir_all(&sample_dir).unwrap();
        fs::write(sample_dir.join("ReadsPerGene.out.tab"), text).unwrap();
    }

    fn config(root: &Path) -> Config {
        let mut config = Config::default();
        config.paths.base_data = root.join("star");
        config.paths.local_data = root.join("local");
        let conditions = ["chunk", "chunk", "chunk", "dissociated", "dissociated", "dissociated"];
        for (j, cond) in conditions.iter().enumerate() {
            let id = format!("S{}", j + 1);
            write_star(&config.paths.base_data, &id, j);
            config.samples.push(SampleConfig {
                id,
                condition: cond.to_string(),
                pool: None,
            });
        }
        config.gsea.min_size = 3;
        config.gsea.nperm = 100;
        config
    }

    #[test]
    fn test_bulk_then_report_then_gsea() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());

        let outcome = run_bulk_comparison(&config).unwrap();
        assert_eq!(outcome.filter.dropped, 1);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.model_dir.join("manifest.json").exists());
        assert!(outcome.results_dirs.iter().all(|d| d.join("results.tsv").exists()));
        let loose = &outcome.results[0];
        let hits = loose.upregulated_genes(0.1);
        let injected = (0..N_GENES)
            .step_by(5)
            .filter(|g| hits.contains(&format!("ENSG{:05}", g).as_str()))
            .count();
        assert!(injected >= 12, "{} of 16 injected genes called up", injected);
        let loose_hits = loose.significant_genes(0.1);
        assert!(loose.significant_genes(0.05).iter().all(|g| loose_hits.contains(g)));
        assert!(loose.has_shrunken_lfc());

        let report = run_report(&config, &outcome.comparison).unwrap();
        let expected = [
            "volcano.svg",
            "pca.svg",
            "pca.tsv",
            "sample_distances.svg",
            "mean_variance.svg",
        ];
        for name in expected {
            assert!(report.dir.join(name).exists(), "{} missing", name);
        }

        let gmt = tmp.path().join("sets.gmt");
        let up: Vec<String> = (0..N_GENES).step_by(5).map(|g| format!("ENSG{:05}", g)).collect();
        fs::write(&gmt, format!("UP_SET\tinjected\t{}\n", up.join("\t"))).unwrap();
        config.gsea.gmt = Some(gmt);
        let gsea = run_enrichment(&config, &outcome.comparison).unwrap();
        assert!(config.gsea_dir(&outcome.comparison).join("gsea_results.tsv").exists());
        assert!(gsea.len() <= 1);
    }

    #[test]
    fn test_pseudobulk_with_gc_length_factors() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());
        config.comparison.name = "chunk_vs_pseudobulk".to_string();

        let matrix = tmp.path().join("pseudobulk.tsv");
        let mut text = String::from("gene_id\tPB1\tPB2\n");
        for g in 0..N_GENES {
            text.push_str(&format!("ENSG{:05}\t{}\t{}\n", g, count(g, 1) * 2, count(g, 2) * 2));
        }
        fs::write(&matrix, text).unwrap();
        config.pseudobulk.matrix = Some(matrix);

        // genes 60.. stay unannotated
        let table = tmp.path().join("annotation.tsv");
        let mut text = String::from("gene_id\tgene_name\tbiotype\tlength\tgc\n");
        for g in 0..60 {
            text.push_str(&format!(
                "ENSG{:05}\tG{}\tprotein_coding\t{}\t{}\n",
                g,
                g,
                1000 + 37 * g,
                0.35 + 0.003 * g as f64
            ));
        }
        fs::write(&table, text).unwrap();
        config.annotation.table = Some(table);

        let outcome = run_pseudobulk_comparison(&config).unwrap();
        assert_eq!(outcome.contrast.numerator, "pseudobulk");
        assert_eq!(outcome.contrast.denominator, "chunk");
        assert_eq!(outcome.results[0].n_genes(), N_GENES);
        assert!(outcome.model_dir.join("normalization.tsv").exists());
        assert!(config.results_dir("chunk_vs_pseudobulk", 0.05).join("results.tsv").exists());
    }

    #[test]
    fn test_pseudobulk_requires_matrix() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        assert!(matches!(
            run_pseudobulk_comparison(&config),
            Err(PipelineError::InvalidInput { .. })
        ));
    }
}
