//! Variance-stabilized values for PCA and sample distances

mod vst;

pub use vst::{vst, vst_method, VstMethod, VstResult};
