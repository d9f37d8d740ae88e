//! Versioned on-disk artifacts handed from one pipeline run to the next.
//!
//! Every artifact directory holds a `manifest.json` that declares a schema
//! version, the artifact kind and, for each TSV table in the directory, its
//! ordered columns with dtypes and its row count. Loading validates all of
//! these before any value is parsed. The manifest is written last, so a
//! directory left behind by an interrupted write fails to load.
//!
//! Floats are written in shortest round-trip form and parsed back
//! bit-identically; `NaN` is written as an empty field.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::{CountMatrix, DESeqDataSet, SampleMetadata};
use crate::error::{PipelineError, Result};
use crate::io::{Contrast, DESeqResults};

pub const SCHEMA_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Model,
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Str,
    F64,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: DType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub file: String,
    pub columns: Vec<ColumnSpec>,
    pub n_rows: usize,
}

/// Parametric dispersion trend `asympt_disp + extra_pois / mean`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendCoefficients {
    pub asympt_disp: f64,
    pub extra_pois: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub kind: ArtifactKind,
    pub comparison: String,
    pub contrast: Contrast,
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub trend: Option<TrendCoefficients>,
    pub tables: Vec<TableSchema>,
}

impl Manifest {
    fn table(&self, file: &str, dir: &Path) -> Result<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.file == file)
            .ok_or_else(|| schema_error(dir, format!("manifest does not declare {}", file)))
    }
}

fn schema_error(path: &Path, reason: String) -> PipelineError {
    PipelineError::SchemaMismatch {
        path: path.display().to_string(),
        reason,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Column {
    Str(Vec<String>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
}

impl Column {
    fn len(&self) -> usize {
        match self {
            Column::Str(v) => v.len(),
            Column::F64(v) => v.len(),
            Column::Bool(v) => v.len(),
        }
    }

    fn dtype(&self) -> DType {
        match self {
            Column::Str(_) => DType::Str,
            Column::F64(_) => DType::F64,
            Column::Bool(_) => DType::Bool,
        }
    }

    fn cell(&self, row: usize) -> String {
        match self {
            Column::Str(v) => v[row].clone(),
            Column::F64(v) => format_f64(v[row]),
            Column::Bool(v) => v[row].to_string(),
        }
    }
}

/// Shortest representation that parses back to the same bits
pub fn format_f64(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else if v == 0.0 || !v.is_finite() || (1e-5..1e16).contains(&v.abs()) {
        format!("{}", v)
    } else {
        format!("{:e}", v)
    }
}

fn parse_f64(s: &str) -> Option<f64> {
    if s.is_empty() {
        Some(f64::NAN)
    } else {
        s.parse().ok()
    }
}

/// Named, typed columns of equal length
#[derive(Debug, Clone, Default, PartialEq)]
struct Frame {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Frame {
    fn push(&mut self, name: &str, column: Column) -> &mut Self {
        self.names.push(name.to_string());
        self.columns.push(column);
        self
    }

    fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    fn column(&self, name: &str, dir: &Path) -> Result<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| schema_error(dir, format!("column '{}' missing", name)))
    }

    fn strings(&self, name: &str, dir: &Path) -> Result<Vec<String>> {
        match self.column(name, dir)? {
            Column::Str(v) => Ok(v.clone()),
            _ => Err(schema_error(dir, format!("column '{}' is not str", name))),
        }
    }

    fn floats(&self, name: &str, dir: &Path) -> Result<Vec<f64>> {
        match self.column(name, dir)? {
            Column::F64(v) => Ok(v.clone()),
            _ => Err(schema_error(dir, format!("column '{}' is not f64", name))),
        }
    }

    fn bools(&self, name: &str, dir: &Path) -> Result<Vec<bool>> {
        match self.column(name, dir)? {
            Column::Bool(v) => Ok(v.clone()),
            _ => Err(schema_error(dir, format!("column '{}' is not bool", name))),
        }
    }
}

fn write_table(dir: &Path, file: &str, frame: &Frame) -> Result<TableSchema> {
    let n_rows = frame.n_rows();
    if let Some(bad) = frame.columns.iter().position(|c| c.len() != n_rows) {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} rows", n_rows),
            got: format!("{} rows in column '{}'", frame.columns[bad].len(), frame.names[bad]),
        });
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(dir.join(file))?;
    writer.write_record(&frame.names)?;
    for row in 0..n_rows {
        writer.write_record(frame.columns.iter().map(|c| c.cell(row)))?;
    }
    writer.flush()?;

    Ok(TableSchema {
        file: file.to_string(),
        columns: frame
            .names
            .iter()
            .zip(frame.columns.iter())
            .map(|(name, c)| ColumnSpec {
                name: name.clone(),
                dtype: c.dtype(),
            })
            .collect(),
        n_rows,
    })
}

fn read_table(dir: &Path, schema: &TableSchema) -> Result<Frame> {
    let path = dir.join(&schema.file);
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(&path)?;

    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let declared: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
    if header != declared {
        return Err(schema_error(
            &path,
            format!("header {:?} differs from declared columns {:?}", header, declared),
        ));
    }

    let mut columns: Vec<Column> = schema
        .columns
        .iter()
        .map(|c| match c.dtype {
            DType::Str => Column::Str(Vec::with_capacity(schema.n_rows)),
            DType::F64 => Column::F64(Vec::with_capacity(schema.n_rows)),
            DType::Bool => Column::Bool(Vec::with_capacity(schema.n_rows)),
        })
        .collect();

    let mut n_rows = 0;
    for record in reader.records() {
        let record = record?;
        n_rows += 1;
        for (j, col) in columns.iter_mut().enumerate() {
            let field = &record[j];
            let bad = || {
                let dtype = schema.columns[j].dtype;
                schema_error(&path, format!("row {}: '{}' is not {:?}", n_rows, field, dtype))
            };
            match col {
                Column::Str(v) => v.push(field.to_string()),
                Column::F64(v) => v.push(parse_f64(field).ok_or_else(bad)?),
                Column::Bool(v) => v.push(field.parse().map_err(|_| bad())?),
            }
        }
    }
    if n_rows != schema.n_rows {
        return Err(schema_error(
            &path,
            format!("{} rows on disk, manifest declares {}", n_rows, schema.n_rows),
        ));
    }

    Ok(Frame {
        names: header,
        columns,
    })
}

fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<()> {
    let file = BufWriter::new(File::create(dir.join(MANIFEST_FILE))?);
    serde_json::to_writer_pretty(file, manifest)?;
    Ok(())
}

fn read_manifest(dir: &Path, kind: ArtifactKind) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    let manifest: Manifest = serde_json::from_reader(File::open(&path)?)?;
    if manifest.schema_version != SCHEMA_VERSION {
        return Err(schema_error(
            &path,
            format!(
                "schema version {} is not supported (expected {})",
                manifest.schema_version, SCHEMA_VERSION
            ),
        ));
    }
    if manifest.kind != kind {
        return Err(schema_error(
            &path,
            format!("artifact kind is {:?}, expected {:?}", manifest.kind, kind),
        ));
    }
    Ok(manifest)
}

const RESULTS_FILE: &str = "results.tsv";

/// Write a result table to `dir` (created if needed)
pub fn save_results(dir: &Path, comparison: &str, results: &DESeqResults) -> Result<()> {
    fs::create_dir_all(dir)?;
    let mut frame = Frame::default();
    frame
        .push("gene_id", Column::Str(results.gene_ids.clone()))
        .push("base_mean", Column::F64(results.base_means.clone()))
        .push("base_var", Column::F64(results.base_vars.clone()))
        .push("log2_fold_change", Column::F64(results.log2_fold_changes.clone()))
        .push("lfc_se", Column::F64(results.lfc_se.clone()))
        .push("log2_fold_change_shrunk", Column::F64(results.log2_fold_changes_shrunk.clone()))
        .push("lfc_se_shrunk", Column::F64(results.lfc_se_shrunk.clone()))
        .push("stat", Column::F64(results.stat.clone()))
        .push("pvalue", Column::F64(results.pvalues.clone()))
        .push("padj", Column::F64(results.padj.clone()))
        .push("dispersion", Column::F64(results.dispersions.clone()));

    let table = write_table(dir, RESULTS_FILE, &frame)?;
    write_manifest(
        dir,
        &Manifest {
            schema_version: SCHEMA_VERSION,
            kind: ArtifactKind::Results,
            comparison: comparison.to_string(),
            contrast: results.contrast.clone(),
            alpha: Some(results.alpha),
            trend: None,
            tables: vec![table],
        },
    )?;
    log::info!("Wrote {} genes to {}", results.n_genes(), dir.display());
    Ok(())
}

/// Load a result table written by [`save_results`]
pub fn load_results(dir: &Path) -> Result<DESeqResults> {
    let manifest = read_manifest(dir, ArtifactKind::Results)?;
    let frame = read_table(dir, manifest.table(RESULTS_FILE, dir)?)?;
    let alpha = manifest
        .alpha
        .ok_or_else(|| schema_error(dir, "results manifest has no alpha".to_string()))?;

    Ok(DESeqResults {
        gene_ids: frame.strings("gene_id", dir)?,
        base_means: frame.floats("base_mean", dir)?,
        base_vars: frame.floats("base_var", dir)?,
        log2_fold_changes: frame.floats("log2_fold_change", dir)?,
        lfc_se: frame.floats("lfc_se", dir)?,
        log2_fold_changes_shrunk: frame.floats("log2_fold_change_shrunk", dir)?,
        lfc_se_shrunk: frame.floats("lfc_se_shrunk", dir)?,
        stat: frame.floats("stat", dir)?,
        pvalues: frame.floats("pvalue", dir)?,
        padj: frame.floats("padj", dir)?,
        dispersions: frame.floats("dispersion", dir)?,
        contrast: manifest.contrast,
        alpha,
    })
}

/// How counts were scaled when the model was fitted
#[derive(Debug, Clone, PartialEq)]
pub enum Normalization {
    SizeFactors(Array1<f64>),
    /// Genes x samples, rows centered to geometric mean 1
    Factors(Array2<f64>),
}

/// Everything needed to rebuild the fitted dataset for downstream reports
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub comparison: String,
    pub contrast: Contrast,
    pub counts: CountMatrix,
    pub metadata: SampleMetadata,
    pub normalization: Normalization,
    pub base_means: Vec<f64>,
    pub gene_dispersions: Vec<f64>,
    pub trended_dispersions: Vec<f64>,
    pub map_dispersions: Vec<f64>,
    pub trend: Option<TrendCoefficients>,
    pub coefficient_names: Vec<String>,
    /// Natural-log scale, genes x coefficients
    pub coefficients: Array2<f64>,
    pub converged: Vec<bool>,
}

fn missing(what: &str) -> PipelineError {
    PipelineError::InvalidInput {
        reason: format!("model has no {}; run the fit before saving", what),
    }
}

impl ModelArtifact {
    pub fn from_dataset(dds: &DESeqDataSet, comparison: &str, contrast: &Contrast) -> Result<Self> {
        let normalization = match (dds.normalization_factors(), dds.size_factors()) {
            (Some(nf), _) => Normalization::Factors(nf.clone()),
            (None, Some(sf)) => Normalization::SizeFactors(sf.clone()),
            (None, None) => return Err(missing("normalization")),
        };
        let to_vec = |a: Option<&Array1<f64>>, what: &str| a.map(|a| a.to_vec()).ok_or_else(|| missing(what));

        Ok(Self {
            comparison: comparison.to_string(),
            contrast: contrast.clone(),
            counts: dds.counts().clone(),
            metadata: dds.sample_metadata().clone(),
            normalization,
            base_means: dds.base_means()?.to_vec(),
            gene_dispersions: to_vec(dds.gene_dispersions(), "gene-wise dispersions")?,
            trended_dispersions: to_vec(dds.trended_dispersions(), "trended dispersions")?,
            map_dispersions: to_vec(dds.map_dispersions(), "MAP dispersions")?,
            trend: dds.dispersion_function().map(|(a, b)| TrendCoefficients {
                asympt_disp: a,
                extra_pois: b,
            }),
            coefficient_names: dds.design_column_names().cloned().ok_or_else(|| missing("design"))?,
            coefficients: dds.coefficients().cloned().ok_or_else(|| missing("coefficients"))?,
            converged: dds.converged().cloned().ok_or_else(|| missing("convergence flags"))?,
        })
    }

    /// Rebuild a dataset carrying the stored normalization and dispersions
    pub fn into_dataset(self) -> Result<DESeqDataSet> {
        let mut dds = DESeqDataSet::new(self.counts, self.metadata, &self.contrast.variable)?;
        match self.normalization {
            Normalization::SizeFactors(sf) => dds.set_size_factors(sf)?,
            Normalization::Factors(nf) => dds.set_normalization_factors(nf)?,
        }
        dds.set_gene_dispersions(Array1::from(self.gene_dispersions))?;
        dds.set_trended_dispersions(Array1::from(self.trended_dispersions))?;
        dds.set_map_dispersions(Array1::from(self.map_dispersions))?;
        if let Some(t) = self.trend {
            dds.set_dispersion_function(t.asympt_disp, t.extra_pois);
        }
        Ok(dds)
    }
}

const COUNTS_FILE: &str = "counts.tsv";
const SAMPLES_FILE: &str = "samples.tsv";
const NORMALIZATION_FILE: &str = "normalization.tsv";
const MODEL_FILE: &str = "model.tsv";
const COEF_PREFIX: &str = "coef:";

/// Write the fitted model of one comparison to `dir`
pub fn save_model(dir: &Path, model: &ModelArtifact) -> Result<()> {
    fs::create_dir_all(dir)?;
    let counts = model.counts.counts();
    let mut tables = Vec::new();

    let mut frame = Frame::default();
    frame.push("gene_id", Column::Str(model.counts.gene_ids().to_vec()));
    for (j, s) in model.counts.sample_ids().iter().enumerate() {
        frame.push(s, Column::F64(counts.column(j).to_vec()));
    }
    tables.push(write_table(dir, COUNTS_FILE, &frame)?);

    let mut frame = Frame::default();
    frame.push("sample_id", Column::Str(model.metadata.sample_ids().to_vec()));
    for name in model.metadata.columns() {
        let values = model.metadata.column(name).unwrap_or_default().to_vec();
        frame.push(name, Column::Str(values));
    }
    tables.push(write_table(dir, SAMPLES_FILE, &frame)?);

    let mut frame = Frame::default();
    match &model.normalization {
        Normalization::SizeFactors(sf) => {
            frame
                .push("sample_id", Column::Str(model.counts.sample_ids().to_vec()))
                .push("size_factor", Column::F64(sf.to_vec()));
        }
        Normalization::Factors(nf) => {
            frame.push("gene_id", Column::Str(model.counts.gene_ids().to_vec()));
            for (j, s) in model.counts.sample_ids().iter().enumerate() {
                frame.push(s, Column::F64(nf.column(j).to_vec()));
            }
        }
    }
    tables.push(write_table(dir, NORMALIZATION_FILE, &frame)?);

    let mut frame = Frame::default();
    frame
        .push("gene_id", Column::Str(model.counts.gene_ids().to_vec()))
        .push("base_mean", Column::F64(model.base_means.clone()))
        .push("dispersion_gene", Column::F64(model.gene_dispersions.clone()))
        .push("dispersion_trend", Column::F64(model.trended_dispersions.clone()))
        .push("dispersion_map", Column::F64(model.map_dispersions.clone()));
    for (k, name) in model.coefficient_names.iter().enumerate() {
        frame.push(
            &format!("{}{}", COEF_PREFIX, name),
            Column::F64(model.coefficients.column(k).to_vec()),
        );
    }
    frame.push("converged", Column::Bool(model.converged.clone()));
    tables.push(write_table(dir, MODEL_FILE, &frame)?);

    write_manifest(
        dir,
        &Manifest {
            schema_version: SCHEMA_VERSION,
            kind: ArtifactKind::Model,
            comparison: model.comparison.clone(),
            contrast: model.contrast.clone(),
            alpha: None,
            trend: model.trend,
            tables,
        },
    )?;
    log::info!("Wrote model artifact to {}", dir.display());
    Ok(())
}

fn columns_to_matrix(frame: &Frame, names: &[String], n_rows: usize, dir: &Path) -> Result<Array2<f64>> {
    let mut m = Array2::zeros((n_rows, names.len()));
    for (j, name) in names.iter().enumerate() {
        for (i, v) in frame.floats(name, dir)?.into_iter().enumerate() {
            m[[i, j]] = v;
        }
    }
    Ok(m)
}

/// Load a model written by [`save_model`]
pub fn load_model(dir: &Path) -> Result<ModelArtifact> {
    let manifest = read_manifest(dir, ArtifactKind::Model)?;

    let counts_frame = read_table(dir, manifest.table(COUNTS_FILE, dir)?)?;
    let gene_ids = counts_frame.strings("gene_id", dir)?;
    let sample_ids: Vec<String> = counts_frame.names[1..].to_vec();
    let counts = CountMatrix::new(
        columns_to_matrix(&counts_frame, &sample_ids, gene_ids.len(), dir)?,
        gene_ids.clone(),
        sample_ids.clone(),
    )?;

    let samples_frame = read_table(dir, manifest.table(SAMPLES_FILE, dir)?)?;
    let mut metadata = SampleMetadata::new(samples_frame.strings("sample_id", dir)?)?;
    for name in &samples_frame.names[1..] {
        metadata.add_column(name, samples_frame.strings(name, dir)?)?;
    }
    metadata.relevel(&manifest.contrast.variable, &manifest.contrast.denominator)?;

    let norm_frame = read_table(dir, manifest.table(NORMALIZATION_FILE, dir)?)?;
    let normalization = if norm_frame.names.first().map(String::as_str) == Some("sample_id") {
        Normalization::SizeFactors(Array1::from(norm_frame.floats("size_factor", dir)?))
    } else {
        Normalization::Factors(columns_to_matrix(&norm_frame, &sample_ids, gene_ids.len(), dir)?)
    };

    let model_frame = read_table(dir, manifest.table(MODEL_FILE, dir)?)?;
    if model_frame.strings("gene_id", dir)? != gene_ids {
        return Err(schema_error(dir, "model.tsv gene order differs from counts.tsv".to_string()));
    }
    let coef_columns: Vec<String> = model_frame
        .names
        .iter()
        .filter(|n| n.starts_with(COEF_PREFIX))
        .cloned()
        .collect();

    Ok(ModelArtifact {
        comparison: manifest.comparison,
        contrast: manifest.contrast,
        coefficients: columns_to_matrix(&model_frame, &coef_columns, gene_ids.len(), dir)?,
        coefficient_names: coef_columns
            .iter()
            .map(|n| n.trim_start_matches(COEF_PREFIX).to_string())
            .collect(),
        counts,
        metadata,
        normalization,
        base_means: model_frame.floats("base_mean", dir)?,
        gene_dispersions: model_frame.floats("dispersion_gene", dir)?,
        trended_dispersions: model_frame.floats("dispersion_trend", dir)?,
        map_dispersions: model_frame.floats("dispersion_map", dir)?,
        trend: manifest.trend,
        converged: model_frame.bools("converged", dir)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    fn contrast() -> Contrast {
        Contrast {
            variable: "condition".into(),
            numerator: "dissociated".into(),
            denominator: "chunk".into(),
        }
    }

    fn results() -> DESeqResults {
        let mut r = DESeqResults::new(vec!["ENSG1".into(), "ENSG2".into(), "ENSG3".into()], contrast(), 0.05);
        r.base_means = vec![1234.5678901234567, 0.1, 0.0];
        r.base_vars = vec![1e-300, 3.0e20, f64::NAN];
        r.log2_fold_changes = vec![-0.30000000000000004, 2.5, 0.0];
        r.lfc_se = vec![0.12, 1.0 / 3.0, 0.0];
        r.stat = vec![-2.5, 7.5, f64::NAN];
        r.pvalues = vec![0.012419330651552318, 6.38e-14, f64::NAN];
        r.padj = vec![0.0186, 1.9e-13, f64::NAN];
        r.dispersions = vec![0.05, std::f64::consts::PI, 8.0];
        r
    }

    fn same_bits(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len()
            && a.iter()
                .zip(b)
                .all(|(x, y)| (x.is_nan() && y.is_nan()) || x.to_bits() == y.to_bits())
    }

    #[test]
    fn results_round_trip_is_lossless() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("adipose_FDR_0.05");
        let r = results();
        save_results(&out, "adipose", &r).unwrap();
        let back = load_results(&out).unwrap();

        assert_eq!(back.gene_ids, r.gene_ids);
        assert_eq!(back.contrast, r.contrast);
        assert_eq!(back.alpha, 0.05);
        assert!(same_bits(&back.base_means, &r.base_means));
        assert!(same_bits(&back.base_vars, &r.base_vars));
        assert!(same_bits(&back.log2_fold_changes, &r.log2_fold_changes));
        assert!(same_bits(&back.lfc_se, &r.lfc_se));
        assert!(same_bits(&back.log2_fold_changes_shrunk, &r.log2_fold_changes_shrunk));
        assert!(same_bits(&back.pvalues, &r.pvalues));
        assert!(same_bits(&back.padj, &r.padj));
        assert!(same_bits(&back.dispersions, &r.dispersions));
    }

    #[test]
    fn tampered_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        save_results(dir.path(), "x", &results()).unwrap();
        let path = dir.path().join(RESULTS_FILE);
        let text = fs::read_to_string(&path).unwrap().replacen("padj", "qvalue", 1);
        fs::write(&path, text).unwrap();
        assert!(matches!(load_results(dir.path()), Err(PipelineError::SchemaMismatch { .. })));
    }

    #[test]
    fn wrong_version_or_kind_is_rejected() {
        let dir = TempDir::new().unwrap();
        save_results(dir.path(), "x", &results()).unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replace("\"schema_version\": 1", "\"schema_version\": 99")).unwrap();
        assert!(matches!(load_results(dir.path()), Err(PipelineError::SchemaMismatch { .. })));

        fs::write(&path, text).unwrap();
        assert!(matches!(load_model(dir.path()), Err(PipelineError::SchemaMismatch { .. })));
    }

    #[test]
    fn model_round_trip_preserves_normalization_factors() {
        let ids: Vec<String> = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        let counts = CountMatrix::new(
            array![[10.0, 12.0, 30.0, 33.0], [100.0, 90.0, 95.0, 105.0]],
            vec!["g1".into(), "g2".into()],
            ids.clone(),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(ids).unwrap();
        meta.add_column("condition", vec!["chunk".into(), "chunk".into(), "pb".into(), "pb".into()])
            .unwrap();
        meta.add_column("pool", vec!["p1".into(), "p2".into(), "NA".into(), "NA".into()])
            .unwrap();
        meta.relevel("condition", "chunk").unwrap();

        let model = ModelArtifact {
            comparison: "bulk_vs_pb".into(),
            contrast: Contrast {
                variable: "condition".into(),
                numerator: "pb".into(),
                denominator: "chunk".into(),
            },
            counts,
            metadata: meta,
            normalization: Normalization::Factors(array![[0.5, 1.0, 1.0, 2.0], [1.1, 0.9, 1.0, 1.0 / 0.99]]),
            base_means: vec![21.25, 97.5],
            gene_dispersions: vec![0.1, 0.01],
            trended_dispersions: vec![0.08, 0.02],
            map_dispersions: vec![0.09, 0.015],
            trend: Some(TrendCoefficients {
                asympt_disp: 0.01,
                extra_pois: 1.5,
            }),
            coefficient_names: vec!["Intercept".into(), "condition_pb_vs_chunk".into()],
            coefficients: array![[2.3, 1.1], [4.6, 0.05]],
            converged: vec![true, false],
        };

        let dir = TempDir::new().unwrap();
        save_model(dir.path(), &model).unwrap();
        let back = load_model(dir.path()).unwrap();
        assert_eq!(back.counts.counts(), model.counts.counts());
        assert_eq!(back.metadata, model.metadata);
        assert_eq!(back.normalization, model.normalization);
        assert_eq!(back.coefficient_names, model.coefficient_names);
        assert_eq!(back.coefficients, model.coefficients);
        assert_eq!(back.converged, model.converged);
        assert_eq!(back.trend, model.trend);

        let dds = back.into_dataset().unwrap();
        assert_eq!(dds.map_dispersions().unwrap()[1], 0.015);
    }
}
