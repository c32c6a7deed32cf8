use std::path::{Path, PathBuf};

use anyhow::Result;
use polars::prelude::DataType;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::PlzIndex;
use crate::buildings::{BuildingTable, enrich};
use crate::common;
use crate::config::{Config, EnrichOptions};
use crate::regions::RegionSet;

/// Build the postal-code index over every partition below the BBD root.
///
/// Each partition is enriched and, when it lacks one, given a `plz` column by
/// an intersects-join against the boundary file. Partitions that changed are
/// persisted to the mirrored `_mod` tree and indexed under their new path;
/// untouched partitions are indexed in place. The index document is written
/// as a whole, replacing any previous one.
pub fn build_index(config: &Config, opts: &EnrichOptions) -> Result<PlzIndex> {
    info!(
        root = %config.bbd_root.display(),
        "building the PLZ index over the building database"
    );
    common::require_dir_exists(&config.bbd_root)?;
    let regions = RegionSet::load(&config.plz_file)?;

    let mut index = PlzIndex::default();
    for entry in WalkDir::new(&config.bbd_root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(%error, "skipping unreadable entry in the building database");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !is_partition_file(path) {
            continue;
        }
        let (file_used, table) = prepare_partition(config, opts, &regions, path)?;
        let munc_id = common::municipality_id(path)?;
        let file_ref = relative_reference(&config.base_dir, &file_used);
        for code in partition_codes(&table)? {
            index.observe(&code, &munc_id, &file_ref);
        }
    }

    // Codes spanning municipality or file boundaries are expected near the
    // borders, but worth surfacing.
    for (code, entry) in &index.0 {
        if entry.munc_id.len() > 1 {
            warn!(
                plz = %code,
                municipalities = ?entry.munc_id,
                "PLZ spans multiple municipalities"
            );
        }
        if entry.files.len() > 2 {
            warn!(
                plz = %code,
                files = entry.files.len(),
                "PLZ spans more than two partition files"
            );
        }
    }

    index.save(&config.index_path)?;
    info!(codes = index.len(), "PLZ index written");
    Ok(index)
}

/// Partition sources are `.shp` files that are not prior `_mod` output.
fn is_partition_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    ext.eq_ignore_ascii_case("shp") && !stem.ends_with("_mod")
}

fn prepare_partition(
    config: &Config,
    opts: &EnrichOptions,
    regions: &RegionSet,
    path: &Path,
) -> Result<(PathBuf, BuildingTable)> {
    debug!(partition = %path.display(), "reading partition");
    let table = BuildingTable::from_shapefile(path)?;
    let (mut table, mut modified) = enrich(table, opts)?;
    if !table.has_column("plz") {
        table = regions.assign_codes(&table)?;
        modified = true;
        debug!("'plz' field added");
    }
    if modified {
        let out = common::derive_mod_output_path(&config.enriched_root, &config.bbd_root, path)?;
        table.to_shapefile(&out)?;
        debug!(output = %out.display(), "enriched partition written");
        Ok((out, table))
    } else {
        Ok((path.to_path_buf(), table))
    }
}

/// Distinct postal codes present in a partition; unassigned rows (null code)
/// are not indexed.
fn partition_codes(table: &BuildingTable) -> Result<Vec<String>> {
    let plz = table.data().column("plz")?.cast(&DataType::String)?;
    let mut codes: Vec<String> = plz
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    codes.sort_unstable();
    codes.dedup();
    Ok(codes)
}

/// Index entries reference files relative to the workspace base when the file
/// lives below it.
fn relative_reference(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
