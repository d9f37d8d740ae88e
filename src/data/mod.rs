//! Count data, sample tables and the dataset the model is fitted on

pub mod assemble;
mod count_matrix;
mod dataset;
mod metadata;

pub use assemble::{assemble, restrict_to_common_genes, PseudobulkLabels};
pub use count_matrix::CountMatrix;
pub use dataset::DESeqDataSet;
pub(crate) use dataset::center_rows_geometric;
pub use metadata::{SampleMetadata, NA_LEVEL};
