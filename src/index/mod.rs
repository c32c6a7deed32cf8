//! The persisted postal-code index over the building database.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

mod build;
mod query;

pub use build::build_index;
pub use query::{UseFilter, compute_buildings_for_plz, query, save_query_result};

/// Where one postal code's buildings can be found.
///
/// Sets keep the entries de-duplicated; serde writes them as sorted arrays,
/// so rebuilding the index over an unchanged tree produces a byte-identical
/// document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlzEntry {
    /// Municipality ids whose partitions contain the code.
    pub munc_id: BTreeSet<String>,
    /// Partition files containing the code, relative to the workspace base
    /// where possible.
    pub files: BTreeSet<String>,
}

/// The full index: one entry per postal code observed in any partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlzIndex(pub BTreeMap<String, PlzEntry>);

impl PlzIndex {
    pub fn get(&self, code: &str) -> Option<&PlzEntry> {
        self.0.get(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn observe(&mut self, code: &str, munc_id: &str, file: &str) {
        let entry = self.0.entry(code.to_string()).or_default();
        entry.munc_id.insert(munc_id.to_string());
        entry.files.insert(file.to_string());
    }

    /// Write the whole document, replacing any previous index.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            crate::common::ensure_dir_exists(parent)?;
        }
        let file = File::create(path)
            .with_context(|| format!("failed to write index file: {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open index file: {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("malformed index file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_serialize_as_sorted_arrays() {
        let mut index = PlzIndex::default();
        index.observe("80331", "09162000", "b.shp");
        index.observe("80331", "09162000", "a.shp");
        index.observe("80331", "09161000", "a.shp");

        let json = serde_json::to_string(&index).unwrap();
        assert_eq!(
            json,
            r#"{"80331":{"munc_id":["09161000","09162000"],"files":["a.shp","b.shp"]}}"#
        );
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("index.json");
        let mut index = PlzIndex::default();
        index.observe("85748", "09184119", "Garching.shp");

        index.save(&path).unwrap();
        let loaded = PlzIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert!(loaded.get("85748").is_some());
        assert!(loaded.get("00000").is_none());
    }
}
