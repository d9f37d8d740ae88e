//! Tables and figures derived from persisted model and result tables

mod pca;
mod plots;
mod tables;

pub use pca::{pca, sample_distances, write_distances_tsv, write_pca_tsv, PcaResult};
pub use plots::{
    distance_heatmap, fc_bin, fc_bin_boxplot, mean_variance_plot, pca_plot, volcano_plot, MAX_FC_BIN,
};
pub use tables::write_top_tables;
