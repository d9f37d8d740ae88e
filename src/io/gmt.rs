//! GMT gene-set files: `name <TAB> description <TAB> gene ...`

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct GeneSet {
    pub name: String,
    pub description: String,
    /// Members in file order, without duplicates
    pub genes: Vec<String>,
}

pub fn read_gmt<P: AsRef<Path>>(path: P) -> Result<Vec<GeneSet>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut sets = Vec::new();

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let name = fields.next().unwrap_or_default().trim();
        let description = fields.next().map(str::trim).ok_or_else(|| PipelineError::InvalidInput {
            reason: format!("{}: line {} has no description column", path.display(), n + 1),
        })?;
        if name.is_empty() {
            return Err(PipelineError::InvalidInput {
                reason: format!("{}: line {} has an empty set name", path.display(), n + 1),
            });
        }

        let mut seen = HashSet::new();
        let genes: Vec<String> = fields
            .map(str::trim)
            .filter(|g| !g.is_empty() && seen.insert(*g))
            .map(str::to_string)
            .collect();

        sets.push(GeneSet {
            name: name.to_string(),
            description: description.to_string(),
            genes,
        });
    }

    log::info!("Read {} gene sets from {}", sets.len(), path.display());
    Ok(sets)
}
