//! Per-sample descriptors (condition, pool) aligned with count matrix columns

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{PipelineError, Result};

/// Placeholder for a missing categorical value
pub const NA_LEVEL: &str = "NA";

/// Sample metadata table: one row per sample, categorical columns only.
///
/// Each categorical column may carry an explicit level order whose first
/// entry is the statistical reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    columns: Vec<String>,
    values: HashMap<String, Vec<String>>,
    level_order: HashMap<String, Vec<String>>,
}

impl SampleMetadata {
    /// Create an empty table for the given samples; ids must be unique
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(PipelineError::InvalidMetadata {
                    reason: format!("duplicate sample id '{}'", id),
                });
            }
        }
        Ok(Self {
            sample_ids,
            columns: Vec::new(),
            values: HashMap::new(),
            level_order: HashMap::new(),
        })
    }

    /// Add or replace a categorical column
    pub fn add_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", values.len()),
            });
        }
        if !self.values.contains_key(name) {
            self.columns.push(name.to_string());
        }
        self.level_order.remove(name);
        self.values.insert(name.to_string(), values);
        Ok(())
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Column names in insertion order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.values.get(name).map(|v| v.as_slice())
    }

    /// Levels of a column: the releveled order if set, otherwise sorted
    pub fn levels(&self, name: &str) -> Result<Vec<String>> {
        if let Some(order) = self.level_order.get(name) {
            return Ok(order.clone());
        }
        let values = self.values.get(name).ok_or_else(|| PipelineError::InvalidMetadata {
            reason: format!("column '{}' not found", name),
        })?;
        let mut unique = values.clone();
        unique.sort();
        unique.dedup();
        Ok(unique)
    }

    /// Reference level of a column (first level)
    pub fn reference_level(&self, name: &str) -> Result<String> {
        self.levels(name)?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::InvalidMetadata {
                reason: format!("column '{}' has no levels", name),
            })
    }

    /// Make `reference` the first level of `name`; remaining levels stay sorted
    pub fn relevel(&mut self, name: &str, reference: &str) -> Result<()> {
        let mut levels = self.levels(name)?;
        let pos = levels
            .iter()
            .position(|l| l == reference)
            .ok_or_else(|| PipelineError::InvalidMetadata {
                reason: format!(
                    "level '{}' not present in column '{}' (levels: {:?})",
                    reference, name, levels
                ),
            })?;
        let reference = levels.remove(pos);
        levels.sort();
        levels.insert(0, reference);
        self.level_order.insert(name.to_string(), levels);
        Ok(())
    }

    /// Stack the rows of `other` below `self`.
    ///
    /// Columns missing on either side are filled with `NA`. Releveling of
    /// `self` is kept, with new levels from `other` appended in sorted order.
    pub fn concat(&self, other: &SampleMetadata) -> Result<Self> {
        let mut ids = self.sample_ids.clone();
        ids.extend(other.sample_ids.iter().cloned());
        let mut out = SampleMetadata::new(ids)?;

        let mut names = self.columns.clone();
        for c in &other.columns {
            if !names.contains(c) {
                names.push(c.clone());
            }
        }
        for name in &names {
            let mut values = match self.values.get(name) {
                Some(v) => v.clone(),
                None => vec![NA_LEVEL.to_string(); self.n_samples()],
            };
            match other.values.get(name) {
                Some(v) => values.extend(v.iter().cloned()),
                None => {
                    values.extend(std::iter::repeat(NA_LEVEL.to_string()).take(other.n_samples()))
                }
            }
            out.add_column(name, values)?;
            if let Some(order) = self.level_order.get(name) {
                let mut order = order.clone();
                let extra: Vec<String> = out
                    .levels_unordered(name)
                    .into_iter()
                    .filter(|l| !order.contains(l))
                    .collect();
                order.extend(extra);
                out.level_order.insert(name.clone(), order);
            }
        }
        Ok(out)
    }

    fn levels_unordered(&self, name: &str) -> Vec<String> {
        let mut v = self.values.get(name).cloned().unwrap_or_default();
        v.sort();
        v.dedup();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(ids: &[&str], cond: &[&str]) -> SampleMetadata {
        let mut m = SampleMetadata::new(ids.iter().map(|s| s.to_string()).collect()).unwrap();
        m.add_column("condition", cond.iter().map(|s| s.to_string()).collect())
            .unwrap();
        m
    }

    #[test]
    fn test_levels_sorted_by_default() {
        let m = meta(&["s1", "s2", "s3", "s4"], &["dissociated", "dissociated", "chunk", "chunk"]);
        assert_eq!(m.levels("condition").unwrap(), vec!["chunk", "dissociated"]);
        assert_eq!(m.column("condition").unwrap()[2], "chunk");
    }

    #[test]
    fn test_relevel_sets_reference() {
        let mut m = meta(&["a", "b", "c"], &["chunk", "zeta", "dissociated"]);
        m.relevel("condition", "zeta").unwrap();
        assert_eq!(m.reference_level("condition").unwrap(), "zeta");
        assert_eq!(m.levels("condition").unwrap(), vec!["zeta", "chunk", "dissociated"]);
        assert!(m.relevel("condition", "missing").is_err());
    }

    #[test]
    fn test_duplicate_sample_ids_rejected() {
        assert!(SampleMetadata::new(vec!["a".into(), "a".into()]).is_err());
    }

    #[test]
    fn test_concat_fills_missing_columns() {
        let mut a = meta(&["a", "b"], &["bulk", "bulk"]);
        a.add_column("pool", vec!["p1".into(), "p2".into()]).unwrap();
        a.relevel("condition", "bulk").unwrap();
        let b = meta(&["c"], &["pseudobulk"]);
        let joined = a.concat(&b).unwrap();
        assert_eq!(joined.sample_ids(), &["a", "b", "c"]);
        assert_eq!(joined.column("pool").unwrap(), &["p1", "p2", "NA"]);
        assert_eq!(joined.levels("condition").unwrap(), vec!["bulk", "pseudobulk"]);
    }
}
