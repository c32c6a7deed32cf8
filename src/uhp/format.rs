//! Mapping enriched building tables onto the simulator's numeric encodings.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use polars::prelude::*;
use tracing::debug;

use super::csv::write_uhp_csv;
use crate::buildings::classify::{
    REF_LEVEL_TO_UHP, SIZE_CLASSES, TABULAR_NON_RESIDENTIAL_YEAR_CLASSES,
    TABULAR_RESIDENTIAL_YEAR_CLASSES, ZENSUS_TO_TABULAR, lookup_int, lookup_str,
};
use crate::buildings::{BuildingTable, BuildingUse, RefComponent, enrich};
use crate::config::{Config, EnrichOptions};
use crate::index::{UseFilter, query};

/// Mandatory simulator input columns.
pub const UHP_REQUIRED_COLUMNS: &[&str] =
    &["bid", "area", "use", "free_walls", "lat", "lon", "dist2hp"];

/// Full simulator column order, mandatory columns first.
pub const UHP_COLUMNS: &[&str] = &[
    "bid",
    "area",
    "use",
    "free_walls",
    "lat",
    "lon",
    "dist2hp",
    "year_class",
    "size_class",
    "floors",
    "dwellings",
    "occupants",
    "ref_level_roof",
    "ref_level_wall",
    "ref_level_floor",
    "ref_level_window",
];

/// Rewrite the `use` column to its numeric encoding; numeric input passes
/// through, unknown names become null.
pub fn map_use_types(data: &mut DataFrame) -> Result<()> {
    let column = data.column("use").context("buildings have no 'use' column")?;
    let codes: Int32Chunked = if column.dtype() == &DataType::String {
        column
            .str()?
            .into_iter()
            .map(|value| value.and_then(|name| BuildingUse::from_name(name).map(BuildingUse::code)))
            .collect()
    } else {
        column.cast(&DataType::Int32)?.i32()?.clone()
    };
    data.with_column(codes.with_name("use".into()).into_series())?;
    Ok(())
}

/// Recompute `size_class` from the typology names in `building_type`.
pub fn map_size_classes(data: &mut DataFrame) -> Result<()> {
    let types = data
        .column("building_type")
        .context("buildings have no 'building_type' column")?
        .cast(&DataType::String)?;
    let classes = lookup_int(types.str()?, SIZE_CLASSES).with_name("size_class".into());
    data.with_column(classes.into_series())?;
    Ok(())
}

/// Zensus construction bucket to the nearest TABULA bucket, written into
/// `construction_year`.
pub fn map_construction_to_tabular(data: &mut DataFrame) -> Result<()> {
    let construction = data
        .column("construction")
        .context("buildings have no 'construction' column")?
        .cast(&DataType::String)?;
    let tabular =
        lookup_str(construction.str()?, ZENSUS_TO_TABULAR).with_name("construction_year".into());
    data.with_column(tabular.into_series())?;
    Ok(())
}

/// TABULA bucket to numeric year class, residential and non-residential
/// buildings each using their own table. A pre-existing Zensus `year_class`
/// is preserved as `year_class_zensus`.
pub fn map_tabular_year_classes(data: &mut DataFrame) -> Result<()> {
    if let Ok(existing) = data.column("year_class") {
        let saved = existing
            .as_materialized_series()
            .clone()
            .with_name("year_class_zensus".into());
        data.with_column(saved)?;
    }
    let buckets = data
        .column("construction_year")
        .context("map the construction buckets to TABULA first")?
        .cast(&DataType::String)?;
    let residential = residential_mask(data)?;
    let classes: Int32Chunked = buckets
        .str()?
        .into_iter()
        .zip(residential.into_iter())
        .map(|(bucket, is_residential)| {
            bucket.and_then(|b| {
                let table = if is_residential.unwrap_or(false) {
                    TABULAR_RESIDENTIAL_YEAR_CLASSES
                } else {
                    TABULAR_NON_RESIDENTIAL_YEAR_CLASSES
                };
                table.iter().find(|(key, _)| *key == b).map(|(_, class)| *class)
            })
        })
        .collect();
    data.with_column(classes.with_name("year_class".into()).into_series())?;
    Ok(())
}

/// Internal refurbishment levels 0..=2 to the simulator's 1..=3 scale for all
/// four components; values already outside 0..=2 become null.
pub fn map_refurbishment_levels(data: &mut DataFrame) -> Result<()> {
    for component in RefComponent::ALL {
        let name = component.column();
        let levels = data
            .column(name)
            .with_context(|| format!("buildings have no {name:?} column"))?
            .cast(&DataType::Int32)?;
        let mapped: Int32Chunked = levels
            .i32()?
            .into_iter()
            .map(|value| {
                value.and_then(|level| {
                    REF_LEVEL_TO_UHP
                        .iter()
                        .find(|(from, _)| *from == level)
                        .map(|(_, to)| *to)
                })
            })
            .collect();
        data.with_column(mapped.with_name(name.into()).into_series())?;
    }
    Ok(())
}

/// Enrich a building table, map it to the simulator encodings and write it as
/// input CSV under the scratch directory; returns the written path.
pub fn prepare_uhp_buildings(
    config: &Config,
    opts: &EnrichOptions,
    area_id: &str,
    filter: UseFilter,
    table: BuildingTable,
) -> Result<PathBuf> {
    let (table, _) = enrich(table, opts)?;
    let mut data = table.data().clone();
    for column in UHP_REQUIRED_COLUMNS {
        if data.column(column).is_err() {
            bail!("buildings are missing the required column {column:?}");
        }
    }

    map_use_types(&mut data)?;
    map_size_classes(&mut data)?;
    map_construction_to_tabular(&mut data)?;
    map_tabular_year_classes(&mut data)?;
    map_refurbishment_levels(&mut data)?;

    let file = match filter {
        UseFilter::All => format!("buildings_{area_id}.csv"),
        other => format!("buildings_{area_id}_{}.csv", other.label()),
    };
    let path = config.temp_dir.join(format!("PLZ_{area_id}")).join(file);
    write_uhp_csv(&path, &data, UHP_COLUMNS, &[])?;
    debug!(output = %path.display(), "simulator input written");
    Ok(path)
}

/// Query the building database for a postal code and write the result as
/// simulator input CSV.
pub fn compute_uhp_input_for_plz(
    config: &Config,
    opts: &EnrichOptions,
    code: &str,
    filter: UseFilter,
) -> Result<PathBuf> {
    let table = query(config, opts, code, filter)?;
    prepare_uhp_buildings(config, opts, code, filter, table)
}

/// `use` values that count as residential, by name or numeric code.
fn residential_mask(data: &DataFrame) -> Result<BooleanChunked> {
    let column = data.column("use").context("buildings have no 'use' column")?;
    Ok(if column.dtype() == &DataType::String {
        column
            .str()?
            .into_iter()
            .map(|value| value.map(|v| v.eq_ignore_ascii_case("residential")))
            .collect()
    } else {
        column
            .cast(&DataType::Int32)?
            .i32()?
            .equal(BuildingUse::Residential.code())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn use_names_become_codes_and_numbers_pass_through() {
        let mut named = DataFrame::new(vec![Column::new(
            "use".into(),
            &[Some("Residential"), Some("Commercial"), Some("Barn"), None],
        )])
        .unwrap();
        map_use_types(&mut named).unwrap();
        let codes = named.column("use").unwrap().i32().unwrap();
        assert_eq!(
            codes.into_iter().collect::<Vec<_>>(),
            vec![Some(3), Some(0), None, None]
        );

        let mut numeric =
            DataFrame::new(vec![Column::new("use".into(), &[1.0, 2.0])]).unwrap();
        map_use_types(&mut numeric).unwrap();
        let codes = numeric.column("use").unwrap().i32().unwrap();
        assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec![Some(1), Some(2)]);
    }

    #[test]
    fn tabular_year_classes_split_by_use() {
        let mut data = DataFrame::new(vec![
            Column::new("use".into(), &[3i32, 0]),
            Column::new("construction".into(), &["1949-1978", "1949-1978"]),
            Column::new("year_class".into(), &[2i32, 2]),
        ])
        .unwrap();
        map_construction_to_tabular(&mut data).unwrap();
        map_tabular_year_classes(&mut data).unwrap();

        // residential "1949-1957" is class 3; non-residential has no such
        // bucket, so the class is null
        let classes = data.column("year_class").unwrap().i32().unwrap();
        assert_eq!(classes.into_iter().collect::<Vec<_>>(), vec![Some(3), None]);
        // the Zensus classes are kept aside
        let zensus = data.column("year_class_zensus").unwrap().i32().unwrap();
        assert_eq!(zensus.into_iter().collect::<Vec<_>>(), vec![Some(2), Some(2)]);
    }

    #[test]
    fn refurbishment_levels_shift_to_one_based() {
        let mut data = DataFrame::new(vec![
            Column::new("ref_level_roof".into(), &[Some(0i32), Some(2), None]),
            Column::new("ref_level_wall".into(), &[Some(1i32), Some(5), None]),
            Column::new("ref_level_floor".into(), &[Some(0i32), Some(0), Some(0)]),
            Column::new("ref_level_window".into(), &[Some(2i32), Some(2), Some(2)]),
        ])
        .unwrap();
        map_refurbishment_levels(&mut data).unwrap();
        let roof = data.column("ref_level_roof").unwrap().i32().unwrap();
        assert_eq!(
            roof.into_iter().collect::<Vec<_>>(),
            vec![Some(1), Some(3), None]
        );
        let wall = data.column("ref_level_wall").unwrap().i32().unwrap();
        assert_eq!(wall.into_iter().collect::<Vec<_>>(), vec![Some(2), None, None]);
    }
}
