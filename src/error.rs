//! Error types for the dissociation DE pipelines

use thiserror::Error;

/// Main error type shared by loaders, models and reports
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Gene order mismatch in {file} at row {row}: expected '{expected}', found '{found}'")]
    GeneOrderMismatch {
        file: String,
        row: usize,
        expected: String,
        found: String,
    },

    #[error("Annotation mismatch: {reason}")]
    AnnotationMismatch { reason: String },

    #[error("GLM convergence failed for gene {gene_id}: {reason}")]
    GLMConvergenceFailed { gene_id: String, reason: String },

    #[error("Dispersion estimation failed for gene {gene_id}: {reason}")]
    DispersionEstimationFailed { gene_id: String, reason: String },

    #[error("Invalid design matrix: {reason}")]
    InvalidDesignMatrix { reason: String },

    #[error("Invalid contrast specification: {reason}")]
    InvalidContrast { reason: String },

    #[error("Normalization failed: {reason}")]
    Normalization { reason: String },

    #[error("Enrichment failed: {reason}")]
    Enrichment { reason: String },

    #[error("Plot rendering failed: {reason}")]
    Plot { reason: String },

    #[error("Artifact {path} does not match its schema: {reason}")]
    SchemaMismatch { path: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },
}

impl PipelineError {
    /// Wrap any displayable plotting backend error
    pub fn plot<E: std::fmt::Display>(err: E) -> Self {
        PipelineError::Plot {
            reason: err.to_string(),
        }
    }
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, PipelineError>;
