use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;
use tracing::{debug, info};

use super::{PlzIndex, build_index};
use crate::buildings::{BuildingTable, BuildingUse};
use crate::common;
use crate::config::{Config, EnrichOptions};
use crate::error::HeatprepError;
use crate::geom::METRIC_EPSG;

/// Row filter on the building use type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UseFilter {
    /// Every building, regardless of use.
    #[default]
    All,
    /// One use category.
    Use(BuildingUse),
    /// Union of the Industrial, Commercial and Public categories.
    NonResidential,
}

impl UseFilter {
    /// Parse a filter name; unrecognized names select everything.
    pub fn parse(name: &str) -> Self {
        match name {
            "All" => Self::All,
            "Non-Residential" => Self::NonResidential,
            other => BuildingUse::from_name(other)
                .map(Self::Use)
                .unwrap_or(Self::All),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::All => "All",
            Self::NonResidential => "Non-Residential",
            Self::Use(use_type) => use_type.as_str(),
        }
    }
}

/// All buildings with the given postal code, optionally filtered by use type,
/// concatenated across every partition the index references for the code.
///
/// The index is built on first use. A lookup miss triggers exactly one full
/// rebuild, on the assumption that the index is stale; a second miss raises
/// the typed [`HeatprepError::NoDataForPlz`].
pub fn query(
    config: &Config,
    opts: &EnrichOptions,
    code: &str,
    filter: UseFilter,
) -> Result<BuildingTable> {
    if !config.index_path.is_file() {
        debug!("no index file found, building it now");
        build_index(config, opts)?;
    }
    let mut index = PlzIndex::load(&config.index_path)?;
    if index.get(code).is_none() {
        info!(plz = code, "PLZ not in the index, rebuilding once");
        index = build_index(config, opts)?;
    }
    let Some(entry) = index.get(code) else {
        return Err(HeatprepError::NoDataForPlz(code.to_string()).into());
    };
    debug!(plz = code, files = entry.files.len(), "loading partitions");

    let mut combined: Option<BuildingTable> = None;
    for file in &entry.files {
        let path = resolve_reference(&config.base_dir, file);
        let table = BuildingTable::from_shapefile(&path)
            .with_context(|| format!("failed to load indexed partition {}", path.display()))?
            .reprojected(METRIC_EPSG)?;
        let selected = select_rows(&table, code, filter)?;
        // partitions from different municipalities may carry different extra
        // columns, so the schemas are unioned while stacking
        combined = Some(match combined {
            Some(acc) => acc.vstack_aligned(&selected)?,
            None => selected,
        });
    }
    combined.ok_or_else(|| HeatprepError::NoDataForPlz(code.to_string()).into())
}

/// Query and persist the result as a shapefile under the scratch directory;
/// returns the written path.
pub fn compute_buildings_for_plz(
    config: &Config,
    opts: &EnrichOptions,
    code: &str,
    filter: UseFilter,
) -> Result<PathBuf> {
    let table = query(config, opts, code, filter)?;
    save_query_result(config, code, filter, &table)
}

/// Write a query result to `temp_dir/PLZ_{code}/`, named by code and filter.
pub fn save_query_result(
    config: &Config,
    code: &str,
    filter: UseFilter,
    table: &BuildingTable,
) -> Result<PathBuf> {
    let dir = config.temp_dir.join(format!("PLZ_{code}"));
    common::ensure_dir_exists(&dir)?;
    let file = match filter {
        UseFilter::All => format!("{code}.shp"),
        other => format!("{code}_{}.shp", other.label()),
    };
    let path = dir.join(file);
    table.to_shapefile(&path)?;
    info!(output = %path.display(), "query result saved");
    Ok(path)
}

fn select_rows(table: &BuildingTable, code: &str, filter: UseFilter) -> Result<BuildingTable> {
    let plz = table.data().column("plz")?.cast(&DataType::String)?;
    let mut mask = plz.str()?.equal(code);
    if let Some(use_mask) = use_mask(table, filter)? {
        mask = &mask & &use_mask;
    }
    table.filter(&mask)
}

/// Use-type mask; `None` selects every row. Works on both string-typed and
/// numerically encoded use columns.
fn use_mask(table: &BuildingTable, filter: UseFilter) -> Result<Option<BooleanChunked>> {
    let selected: Vec<BuildingUse> = match filter {
        UseFilter::All => return Ok(None),
        UseFilter::Use(use_type) => vec![use_type],
        UseFilter::NonResidential => vec![
            BuildingUse::Industrial,
            BuildingUse::Commercial,
            BuildingUse::Public,
        ],
    };
    let column = table
        .data()
        .column("use")
        .context("partition has no 'use' column to filter on")?;
    let mask = if column.dtype() == &DataType::String {
        let values = column.str()?;
        let mut mask = values.equal(selected[0].as_str());
        for use_type in &selected[1..] {
            mask = &mask | &values.equal(use_type.as_str());
        }
        mask
    } else {
        let codes = column.cast(&DataType::Int32)?;
        let values = codes.i32()?;
        let mut mask = values.equal(selected[0].code());
        for use_type in &selected[1..] {
            mask = &mask | &values.equal(use_type.code());
        }
        mask
    };
    Ok(Some(mask))
}

fn resolve_reference(base: &Path, reference: &str) -> PathBuf {
    let path = Path::new(reference);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Footprints;
    use crate::geom::testutil::rect;

    #[test]
    fn filter_names_parse_with_a_permissive_fallback() {
        assert_eq!(UseFilter::parse("All"), UseFilter::All);
        assert_eq!(
            UseFilter::parse("Non-Residential"),
            UseFilter::NonResidential
        );
        assert_eq!(
            UseFilter::parse("Residential"),
            UseFilter::Use(BuildingUse::Residential)
        );
        assert_eq!(UseFilter::parse("Castle"), UseFilter::All);
    }

    fn table(uses: &Column) -> BuildingTable {
        let shapes = (0..uses.len())
            .map(|i| rect(i as f64 * 20.0, 0.0, i as f64 * 20.0 + 10.0, 10.0))
            .collect();
        let data = DataFrame::new(vec![
            Column::new("plz".into(), vec!["80331"; uses.len()]),
            uses.clone(),
        ])
        .unwrap();
        BuildingTable::new(Footprints::new(shapes, METRIC_EPSG), data).unwrap()
    }

    #[test]
    fn string_use_columns_filter_by_name() {
        let uses = Column::new(
            "use".into(),
            &["Residential", "Commercial", "Public", "Industrial"],
        );
        let table = table(&uses);
        let selected = select_rows(&table, "80331", UseFilter::NonResidential).unwrap();
        assert_eq!(selected.len(), 3);
        let selected = select_rows(&table, "80331", UseFilter::Use(BuildingUse::Residential))
            .unwrap();
        assert_eq!(selected.len(), 1);
        let selected = select_rows(&table, "99999", UseFilter::All).unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn numeric_use_columns_filter_by_code() {
        let uses = Column::new("use".into(), &[3.0, 0.0, 2.0, 1.0]);
        let table = table(&uses);
        let selected = select_rows(&table, "80331", UseFilter::NonResidential).unwrap();
        assert_eq!(selected.len(), 3);
        let selected = select_rows(&table, "80331", UseFilter::Use(BuildingUse::Public)).unwrap();
        assert_eq!(selected.len(), 1);
    }
}
