//! Preranked gene set enrichment analysis

mod gsea;
mod ranking;

pub use gsea::{
    enrichment_score, run_gsea, write_gsea_tables, EnrichmentScore, GseaParams, GseaResult, GseaResults,
};
pub use ranking::RankedList;
