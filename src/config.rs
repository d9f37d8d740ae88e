//! Layered run configuration.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`DISSOC_*` prefix, `__` separates sections)
//! 2. The TOML file passed on the command line
//! 3. Built-in defaults
//!
//! `DISSOC_PATHS__LOCAL_DATA=/scratch/run1` maps to `paths.local_data`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Default configuration file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "dissoc.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root directory holding per-sample STAR outputs
    pub base_data: PathBuf,
    /// Working directory that receives every artifact
    pub local_data: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_data: PathBuf::from("data"),
            local_data: PathBuf::from("local_data"),
        }
    }
}

/// Which STAR count column to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CountColumn {
    Unstranded,
    Strand1,
    Strand2,
}

impl CountColumn {
    /// Zero-based column index in `ReadsPerGene.out.tab`
    pub fn index(self) -> usize {
        match self {
            CountColumn::Unstranded => 1,
            CountColumn::Strand1 => 2,
            CountColumn::Strand2 => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StarConfig {
    /// Path below `base_data`; `{sample}` is replaced by the sample id
    pub file_template: String,
    pub count_column: CountColumn,
    pub preamble_rows: usize,
}

impl Default for StarConfig {
    fn default() -> Self {
        Self {
            file_template: "{sample}/ReadsPerGene.out.tab".to_string(),
            count_column: CountColumn::Unstranded,
            preamble_rows: 4,
        }
    }
}

impl StarConfig {
    pub fn sample_path(&self, base: &Path, sample: &str) -> PathBuf {
        base.join(self.file_template.replace("{sample}", sample))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SampleConfig {
    pub id: String,
    pub condition: String,
    #[serde(default)]
    pub pool: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Prefix of the `<name>_data` and `<name>_FDR_<alpha>` directories
    pub name: String,
    pub variable: String,
    pub reference: String,
    pub numerator: String,
    pub fdr_thresholds: Vec<f64>,
    pub min_total_reads: f64,
    pub shrink: bool,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            name: "chunk_vs_dissociated".to_string(),
            variable: "condition".to_string(),
            reference: "chunk".to_string(),
            numerator: "dissociated".to_string(),
            fdr_thresholds: vec![0.1, 0.05],
            min_total_reads: 20.0,
            shrink: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub gtf: Option<PathBuf>,
    /// TSV with gene_id, gene_name, biotype, length, gc
    pub table: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PseudobulkConfig {
    pub matrix: Option<PathBuf>,
    /// Condition label stamped on every pseudobulk column
    pub condition: String,
    pub pool: Option<String>,
}

impl Default for PseudobulkConfig {
    fn default() -> Self {
        Self {
            matrix: None,
            condition: "pseudobulk".to_string(),
            pool: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GseaConfig {
    pub gmt: Option<PathBuf>,
    /// Only genes with padj below this enter the ranking
    pub alpha: f64,
    pub nperm: usize,
    pub seed: u64,
    pub min_size: usize,
    pub max_size: usize,
    pub top_n: usize,
}

impl Default for GseaConfig {
    fn default() -> Self {
        Self {
            gmt: None,
            alpha: 0.1,
            nperm: 1000,
            seed: 42,
            min_size: 15,
            max_size: 500,
            top_n: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    pub top_n: usize,
    pub fc_bin_width: f64,
    pub pca_top_genes: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_n: 20,
            fc_bin_width: 1.0,
            pca_top_genes: 500,
        }
    }
}

/// Complete configuration shared by every pipeline
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub star: StarConfig,
    #[serde(default)]
    pub samples: Vec<SampleConfig>,
    #[serde(default)]
    pub comparison: ComparisonConfig,
    #[serde(default)]
    pub annotation: AnnotationConfig,
    #[serde(default)]
    pub pseudobulk: PseudobulkConfig,
    #[serde(default)]
    pub gsea: GseaConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Provider chain: defaults, then the TOML file if it exists, then env
    pub fn figment(path: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        } else {
            log::warn!("Configuration file {} not found; using defaults and environment", path.display());
        }
        figment.merge(Env::prefixed("DISSOC_").split("__"))
    }

    /// Load and validate the configuration
    pub fn load(path: &Path) -> Result<Self> {
        let config: Config = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(PipelineError::InvalidInput { reason });

        if self.samples.is_empty() {
            return invalid("no samples configured".to_string());
        }
        let mut seen = HashSet::new();
        for s in &self.samples {
            if !seen.insert(s.id.as_str()) {
                return invalid(format!("sample '{}' listed twice", s.id));
            }
        }
        if self.comparison.name.trim().is_empty() {
            return invalid("comparison name is empty".to_string());
        }
        if self.comparison.reference == self.comparison.numerator {
            return invalid(format!(
                "reference and numerator are both '{}'",
                self.comparison.reference
            ));
        }
        if self.comparison.fdr_thresholds.is_empty() {
            return invalid("at least one FDR threshold is required".to_string());
        }
        if let Some(bad) = self
            .comparison
            .fdr_thresholds
            .iter()
            .find(|&&a| !(a > 0.0 && a <= 1.0))
        {
            return invalid(format!("FDR threshold {} outside (0, 1]", bad));
        }
        if self.comparison.min_total_reads < 0.0 {
            return invalid("min_total_reads must be non-negative".to_string());
        }
        Ok(())
    }

    pub fn sample_ids(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.id.clone()).collect()
    }

    /// `<local_data>/<comparison>_data`
    pub fn model_dir(&self, comparison: &str) -> PathBuf {
        self.paths.local_data.join(format!("{}_data", comparison))
    }

    /// `<local_data>/<comparison>_FDR_<alpha>`
    pub fn results_dir(&self, comparison: &str, alpha: f64) -> PathBuf {
        self.paths.local_data.join(format!("{}_FDR_{}", comparison, alpha))
    }

    pub fn gsea_dir(&self, comparison: &str) -> PathBuf {
        self.paths.local_data.join(format!("{}_gsea", comparison))
    }

    pub fn report_dir(&self, comparison: &str) -> PathBuf {
        self.paths.local_data.join(format!("{}_report", comparison))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const TOML: &str = r#"
[paths]
base_data = "/data/star"
local_data = "/scratch/dissoc"

[[samples]]
id = "A1"
condition = "chunk"
pool = "p1"

[[samples]]
id = "A2"
condition = "dissociated"

[comparison]
name = "adipose"
reference = "chunk"
numerator = "dissociated"
"#;

    #[test]
    fn loads_toml_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("dissoc.toml", TOML)?;
            let config: Config = Config::figment(Path::new("dissoc.toml")).extract()?;
            assert_eq!(config.paths.base_data, PathBuf::from("/data/star"));
            assert_eq!(config.samples.len(), 2);
            assert_eq!(config.samples[0].pool.as_deref(), Some("p1"));
            assert_eq!(config.samples[1].pool, None);
            assert_eq!(config.comparison.fdr_thresholds, vec![0.1, 0.05]);
            assert_eq!(config.comparison.min_total_reads, 20.0);
            assert_eq!(config.star.preamble_rows, 4);
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn env_overrides_toml() {
        Jail::expect_with(|jail| {
            jail.create_file("dissoc.toml", TOML)?;
            jail.set_env("DISSOC_PATHS__LOCAL_DATA", "/tmp/override");
            jail.set_env("DISSOC_GSEA__NPERM", "250");
            let config: Config = Config::figment(Path::new("dissoc.toml")).extract()?;
            assert_eq!(config.paths.local_data, PathBuf::from("/tmp/override"));
            assert_eq!(config.gsea.nperm, 250);
            Ok(())
        });
    }

    #[test]
    fn output_directory_names() {
        let mut config = Config::default();
        config.paths.local_data = PathBuf::from("/w");
        assert_eq!(config.model_dir("x"), PathBuf::from("/w/x_data"));
        assert_eq!(config.results_dir("x", 0.1), PathBuf::from("/w/x_FDR_0.1"));
        assert_eq!(config.results_dir("x", 0.05), PathBuf::from("/w/x_FDR_0.05"));
    }

    #[test]
    fn validation_rejects_bad_input() {
        let mut config = Config::default();
        assert!(config.validate().is_err(), "no samples");
        config.samples = vec![
            SampleConfig { id: "a".into(), condition: "chunk".into(), pool: None },
            SampleConfig { id: "a".into(), condition: "dissociated".into(), pool: None },
        ];
        assert!(config.validate().is_err(), "duplicate ids");
        config.samples[1].id = "b".into();
        assert!(config.validate().is_ok());
        config.comparison.fdr_thresholds = vec![0.0];
        assert!(config.validate().is_err());
    }
}
