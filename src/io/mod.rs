//! Readers for pipeline inputs and the artifact format shared between runs

pub mod annotation;
pub mod artifacts;
mod count_table;
mod gmt;
mod results;
mod star;

pub use annotation::{load_annotation, AlignedAnnotation, GeneAnnotation, GeneRecord};
pub use artifacts::{load_model, load_results, save_model, save_results, ModelArtifact, Normalization};
pub use count_table::{read_count_matrix, write_count_matrix};
pub use gmt::{read_gmt, GeneSet};
pub use results::{Contrast, DESeqResults, ResultsSummary};
pub use star::{read_star_file, read_star_samples, StarCounts};
