//! SVG figures drawn with plotters

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::path::Path;

use ndarray::Array2;
use plotters::prelude::*;

use super::pca::PcaResult;
use crate::dispersion::TrendFit;
use crate::error::{PipelineError, Result};
use crate::io::annotation::PROTEIN_CODING;
use crate::io::{AlignedAnnotation, DESeqResults};

const SIZE: (u32, u32) = (900, 700);
const FONT: &str = "sans-serif";
const UP: RGBColor = RGBColor(200, 40, 40);
const DOWN: RGBColor = RGBColor(40, 80, 200);
const NEUTRAL: RGBColor = RGBColor(175, 175, 175);
const PALETTE: [RGBColor; 6] = [
    RGBColor(27, 158, 119),
    RGBColor(217, 95, 2),
    RGBColor(117, 112, 179),
    RGBColor(231, 41, 138),
    RGBColor(102, 166, 30),
    RGBColor(230, 171, 2),
];

/// Fold-change bins beyond this magnitude are merged into the outermost bin
pub const MAX_FC_BIN: i32 = 3;

/// Range over the finite values, padded by 5% (or 1 when degenerate)
fn padded_range(values: impl IntoIterator<Item = f64>) -> Range<f64> {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return 0.0..1.0;
    }
    let pad = if hi > lo { 0.05 * (hi - lo) } else { 1.0 };
    (lo - pad)..(hi + pad)
}

/// log2 fold change against -log10 p-value.
///
/// Restricted to protein-coding genes when biotypes are known; significant
/// genes are colored by direction. Returns the number of genes drawn.
pub fn volcano_plot(path: &Path, results: &DESeqResults, annotation: &AlignedAnnotation) -> Result<usize> {
    let protein_only = annotation.has_biotypes();
    if !protein_only {
        log::warn!("No biotype annotation; the volcano plot shows all genes");
    }
    let points: Vec<(f64, f64, RGBColor)> = (0..results.n_genes())
        .filter(|&i| !protein_only || annotation.biotype(i) == Some(PROTEIN_CODING))
        .filter_map(|i| {
            let (lfc, p) = (results.log2_fold_changes[i], results.pvalues[i]);
            if !(lfc.is_finite() && p.is_finite()) {
                return None;
            }
            let significant = results.padj[i] < results.alpha;
            let color = match (significant, lfc > 0.0) {
                (true, true) => UP,
                (true, false) => DOWN,
                _ => NEUTRAL,
            };
            Some((lfc, -p.max(f64::MIN_POSITIVE).log10(), color))
        })
        .collect();

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(PipelineError::plot)?;
    let x_range = padded_range(points.iter().map(|p| p.0));
    let y_max = points.iter().map(|p| p.1).fold(1.0_f64, f64::max) * 1.05;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{} (padj < {})", results.contrast, results.alpha), (FONT, 22))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, 0.0..y_max)
        .map_err(PipelineError::plot)?;
    chart
        .configure_mesh()
        .x_desc("log2 fold change")
        .y_desc("-log10 p-value")
        .draw()
        .map_err(PipelineError::plot)?;
    // neutral points first so significant ones stay on top
    let mut ordered = points.clone();
    ordered.sort_by_key(|p| p.2 != NEUTRAL);
    chart
        .draw_series(ordered.iter().map(|&(x, y, c)| Circle::new((x, y), 2, c.filled())))
        .map_err(PipelineError::plot)?;
    root.present().map_err(PipelineError::plot)?;
    Ok(points.len())
}

/// PC1 against PC2, colored by condition and labeled by sample
pub fn pca_plot(path: &Path, pca: &PcaResult, conditions: &[String]) -> Result<()> {
    let levels: Vec<&String> = conditions.iter().collect::<BTreeSet<_>>().into_iter().collect();
    let color_of = |c: &String| PALETTE[levels.iter().position(|l| *l == c).unwrap_or(0) % PALETTE.len()];

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(PipelineError::plot)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("PCA of the {} most variable genes", pca.n_genes), (FONT, 22))
        .margin(20)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(padded_range(pca.pc1.iter().copied()), padded_range(pca.pc2.iter().copied()))
        .map_err(PipelineError::plot)?;
    chart
        .configure_mesh()
        .x_desc(format!("PC1 ({:.1}% variance)", pca.percent_var[0]))
        .y_desc(format!("PC2 ({:.1}% variance)", pca.percent_var[1]))
        .draw()
        .map_err(PipelineError::plot)?;

    for level in &levels {
        let color = color_of(level);
        let members = (0..pca.sample_ids.len()).filter(|&i| conditions.get(i) == Some(*level));
        chart
            .draw_series(members.map(|i| Circle::new((pca.pc1[i], pca.pc2[i]), 6, color.filled())))
            .map_err(PipelineError::plot)?
            .label(level.as_str())
            .legend(move |(x, y)| Circle::new((x, y), 5, color.filled()));
    }
    chart
        .draw_series(
            pca.sample_ids
                .iter()
                .enumerate()
                .map(|(i, s)| Text::new(s.clone(), (pca.pc1[i], pca.pc2[i]), (FONT, 13))),
        )
        .map_err(PipelineError::plot)?;
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(PipelineError::plot)?;
    root.present().map_err(PipelineError::plot)?;
    Ok(())
}

/// Heatmap of sample-to-sample distances; darker is closer
pub fn distance_heatmap(path: &Path, distances: &Array2<f64>, sample_ids: &[String]) -> Result<()> {
    let n = sample_ids.len() as i32;
    let max = distances.iter().copied().fold(0.0_f64, f64::max);
    let label = |v: &i32| sample_ids.get(*v as usize).cloned().unwrap_or_default();

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(PipelineError::plot)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Sample distances (VST)", (FONT, 22))
        .margin(20)
        .x_label_area_size(90)
        .y_label_area_size(90)
        .build_cartesian_2d(0i32..n, 0i32..n)
        .map_err(PipelineError::plot)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(n as usize)
        .y_labels(n as usize)
        .x_label_formatter(&label)
        .y_label_formatter(&label)
        .draw()
        .map_err(PipelineError::plot)?;
    chart
        .draw_series((0..n).flat_map(|i| (0..n).map(move |j| (i, j))).map(|(i, j)| {
            let t = if max > 0.0 { distances[[i as usize, j as usize]] / max } else { 0.0 };
            let shade = (40.0 + 215.0 * t).round() as u8;
            Rectangle::new([(i, j), (i + 1, j + 1)], RGBColor(shade, shade, 255).filled())
        }))
        .map_err(PipelineError::plot)?;
    root.present().map_err(PipelineError::plot)?;
    Ok(())
}

/// log10 baseMean against log10 gene-wise dispersion with the fitted trend
pub fn mean_variance_plot(
    path: &Path,
    base_means: &[f64],
    dispersions: &[f64],
    trend: Option<&TrendFit>,
) -> Result<()> {
    let points: Vec<(f64, f64)> = base_means
        .iter()
        .zip(dispersions)
        .filter(|(m, d)| **m > 0.0 && **d > 0.0 && m.is_finite() && d.is_finite())
        .map(|(m, d)| (m.log10(), d.log10()))
        .collect();
    let x_range = padded_range(points.iter().map(|p| p.0));
    let curve: Vec<(f64, f64)> = match trend {
        Some(fit) => (0..=100)
            .map(|k| x_range.start + (x_range.end - x_range.start) * k as f64 / 100.0)
            .map(|x| (x, fit.predict(10f64.powf(x)).log10()))
            .filter(|p| p.1.is_finite())
            .collect(),
        None => Vec::new(),
    };
    let y_range = padded_range(points.iter().chain(&curve).map(|p| p.1));

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(PipelineError::plot)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Mean-dispersion relationship", (FONT, 22))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)
        .map_err(PipelineError::plot)?;
    chart
        .configure_mesh()
        .x_desc("log10 mean of normalized counts")
        .y_desc("log10 dispersion")
        .draw()
        .map_err(PipelineError::plot)?;
    chart
        .draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 2, NEUTRAL.filled())))
        .map_err(PipelineError::plot)?;
    if !curve.is_empty() {
        chart
            .draw_series(LineSeries::new(curve, UP.stroke_width(2)))
            .map_err(PipelineError::plot)?;
    }
    root.present().map_err(PipelineError::plot)?;
    Ok(())
}

/// Fold-change bin of width `width`, clamped to `±MAX_FC_BIN`
pub fn fc_bin(lfc: f64, width: f64) -> i32 {
    ((lfc / width).floor() as i32).clamp(-MAX_FC_BIN, MAX_FC_BIN)
}

fn fc_bin_label(bin: i32, width: f64) -> String {
    let lo = bin as f64 * width;
    match bin {
        b if b == -MAX_FC_BIN => format!("< {}", lo + width),
        b if b == MAX_FC_BIN => format!(">= {}", lo),
        _ => format!("[{}, {})", lo, lo + width),
    }
}

/// Boxplots of an annotation covariate per fold-change bin.
///
/// Genes with no value or a non-finite LFC are skipped. Returns the number
/// of genes drawn; nothing is written when no gene qualifies.
pub fn fc_bin_boxplot(
    path: &Path,
    title: &str,
    y_desc: &str,
    lfcs: &[f64],
    values: &[Option<f64>],
    width: f64,
) -> Result<usize> {
    let mut groups: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for (lfc, v) in lfcs.iter().zip(values) {
        if let Some(v) = v.filter(|v| v.is_finite()) {
            if lfc.is_finite() {
                groups.entry(fc_bin(*lfc, width)).or_default().push(v);
            }
        }
    }
    let n_genes: usize = groups.values().map(Vec::len).sum();
    if n_genes == 0 {
        log::warn!("No annotated genes for '{}'; plot skipped", title);
        return Ok(0);
    }

    let labels: Vec<String> = groups.keys().map(|&b| fc_bin_label(b, width)).collect();
    let y = padded_range(groups.values().flatten().copied());
    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(PipelineError::plot)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 22))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(labels[..].into_segmented(), (y.start as f32)..(y.end as f32))
        .map_err(PipelineError::plot)?;
    chart
        .configure_mesh()
        .x_desc("log2 fold change bin")
        .y_desc(y_desc)
        .draw()
        .map_err(PipelineError::plot)?;
    chart
        .draw_series(groups.values().zip(&labels).map(|(vals, label)| {
            Boxplot::new_vertical(SegmentValue::CenterOf(label), &Quartiles::new(vals.as_slice()))
                .width(24)
                .style(DOWN)
        }))
        .map_err(PipelineError::plot)?;
    root.present().map_err(PipelineError::plot)?;
    Ok(n_genes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Contrast, GeneAnnotation, GeneRecord};
    use ndarray::array;

    fn results() -> DESeqResults {
        let contrast = Contrast {
            variable: "condition".into(),
            numerator: "dissociated".into(),
            denominator: "chunk".into(),
        };
        let ids: Vec<String> = (0..6).map(|i| format!("g{}", i)).collect();
        let mut r = DESeqResults::new(ids, contrast, 0.1);
        r.log2_fold_changes = vec![3.5, 1.2, -0.4, -2.2, 0.0, 7.0];
        r.pvalues = vec![1e-8, 0.01, 0.5, 1e-4, 1.0, 0.0];
        r.padj = vec![1e-7, 0.04, 0.7, 1e-3, 1.0, 0.0];
        r.base_means = vec![100.0, 50.0, 10.0, 300.0, 5.0, 1000.0];
        r
    }

    fn svg(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_fc_bins() {
        assert_eq!(fc_bin(0.5, 1.0), 0);
        assert_eq!(fc_bin(-0.5, 1.0), -1);
        assert_eq!(fc_bin(12.0, 1.0), MAX_FC_BIN);
        assert_eq!(fc_bin(-12.0, 1.0), -MAX_FC_BIN);
        assert_eq!(fc_bin_label(1, 1.0), "[1, 2)");
    }

    #[test]
    fn test_plot_files_created() {
        let dir = tempfile::tempdir().unwrap();
        let r = results();
        let records = (0..6)
            .map(|i| GeneRecord {
                gene_id: format!("g{}", i),
                gene_name: None,
                biotype: Some(if i == 2 { "lncRNA" } else { "protein_coding" }.to_string()),
                length: Some(1000.0 + 500.0 * i as f64),
                gc: if i == 4 { None } else { Some(0.4 + 0.02 * i as f64) },
            })
            .collect();
        let annotation = GeneAnnotation::new(records).align(&r.gene_ids);

        let volcano = dir.path().join("volcano.svg");
        assert_eq!(volcano_plot(&volcano, &r, &annotation).unwrap(), 5);
        assert!(svg(&volcano).contains("<svg"));

        let pca = PcaResult {
            sample_ids: vec!["c1".into(), "c2".into(), "d1".into()],
            pc1: vec![-1.0, -0.8, 1.8],
            pc2: vec![0.3, -0.3, 0.0],
            percent_var: [80.0, 15.0],
            n_genes: 6,
        };
        let conditions: Vec<String> = vec!["chunk".into(), "chunk".into(), "dissociated".into()];
        let pca_path = dir.path().join("pca.svg");
        pca_plot(&pca_path, &pca, &conditions).unwrap();
        assert!(svg(&pca_path).contains("d1"));

        let heat = dir.path().join("sample_distances.svg");
        let distances = array![[0.0, 1.0, 4.0], [1.0, 0.0, 3.5], [4.0, 3.5, 0.0]];
        distance_heatmap(&heat, &distances, &pca.sample_ids).unwrap();
        assert!(svg(&heat).contains("<rect"));

        let mv = dir.path().join("mean_variance.svg");
        let trend = TrendFit::Parametric { asympt_disp: 0.05, extra_pois: 1.0 };
        let dispersions = [0.1, 0.2, 0.5, 0.05, f64::NAN, 0.03];
        mean_variance_plot(&mv, &r.base_means, &dispersions, Some(&trend)).unwrap();
        assert!(svg(&mv).contains("<polyline"));

        let gc = dir.path().join("fc_bins_gc.svg");
        let lfcs = &r.log2_fold_changes;
        let drawn = fc_bin_boxplot(&gc, "GC by fold change", "GC", lfcs, &annotation.gc(), 1.0);
        assert_eq!(drawn.unwrap(), 5);
        assert!(gc.exists());

        let empty = dir.path().join("empty.svg");
        assert_eq!(fc_bin_boxplot(&empty, "none", "x", &r.log2_fold_changes, &[None; 6], 1.0).unwrap(), 0);
        assert!(!empty.exists());
    }
}
