//! Rule-based completion of the canonical building-attribute schema.

use anyhow::{Context, Result};
use geo::{Distance, Euclidean};
use polars::prelude::*;
use tracing::{debug, warn};

use super::classify::{RefComponent, SIZE_CLASSES, ZENSUS_YEAR_CLASSES, lookup_int};
use super::table::BuildingTable;
use crate::common::shp;
use crate::config::{EnrichOptions, HeatPlantSource};
use crate::geom::{self, GEOGRAPHIC_EPSG, METRIC_EPSG};

/// Canonical columns produced by [`enrich`], in simulator order.
pub const CANONICAL_COLUMNS: &[&str] = &[
    "bid",
    "area",
    "free_walls",
    "lat",
    "lon",
    "dist2hp",
    "construction",
    "year_class",
    "building_type",
    "size_class",
    "floors",
    "occupants",
    "dwellings",
    "ref_level_roof",
    "ref_level_wall",
    "ref_level_floor",
    "ref_level_window",
];

/// Footprints closer than this are treated as sharing a wall, in meters.
const ADJACENCY_TOLERANCE_M: f64 = 0.1;

/// How a canonical field maps onto the columns of a raw partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldResolution {
    /// The canonical column is already present; never overwritten.
    AlreadyCanonical,
    /// An alternate-named column carries the data; renamed, not recomputed.
    SourcedFrom(&'static str),
    /// Nothing usable; the field is derived or initialized empty.
    Missing,
}

fn resolve_field(df: &DataFrame, canonical: &str, aliases: &[&'static str]) -> FieldResolution {
    if df.column(canonical).is_ok() {
        return FieldResolution::AlreadyCanonical;
    }
    aliases
        .iter()
        .copied()
        .find(|alias| df.column(alias).is_ok())
        .map(FieldResolution::SourcedFrom)
        .unwrap_or(FieldResolution::Missing)
}

/// Complete the canonical attribute set of a raw partition.
///
/// Applies the field rules in a fixed order; later rules may read columns
/// written by earlier ones (`year_class` from `construction`, `size_class`
/// from `building_type`). Canonical columns already present in the input are
/// never overwritten, so a second pass over an enriched partition changes
/// nothing and reports `modified == false`.
///
/// The table comes back in the metric frame (EPSG:32632), which all derived
/// areas and distances are computed in.
pub fn enrich(table: BuildingTable, opts: &EnrichOptions) -> Result<(BuildingTable, bool)> {
    opts.validate()?;

    let mut table = table.reprojected(METRIC_EPSG)?;
    let mut modified = false;

    modified |= lowercase_columns(&mut table)?;
    modified |= rule_bid(&mut table)?;
    modified |= rule_area(&mut table)?;
    modified |= rule_free_walls(&mut table)?;
    modified |= rule_lat_lon(&mut table)?;
    modified |= rule_dist2hp(&mut table, opts)?;
    modified |= rename_or_empty_str(&mut table, "construction", &["constructi", "year"])?;
    modified |= rule_year_class(&mut table)?;
    modified |= rename_or_empty_str(&mut table, "building_type", &["type", "building_t", "btype"])?;
    modified |= rule_size_class(&mut table)?;
    modified |= rename_or_empty_int(&mut table, "floors", &[])?;
    modified |= rename_or_empty_int(&mut table, "occupants", &[])?;
    modified |= rename_or_empty_int(&mut table, "dwellings", &["houses_per_building"])?;
    for component in RefComponent::ALL {
        modified |= rule_ref_level(&mut table, component, opts.ref_level_default)?;
    }

    Ok((table, modified))
}

fn lowercase_columns(table: &mut BuildingTable) -> Result<bool> {
    let names: Vec<String> = table
        .data()
        .get_column_names()
        .iter()
        .map(|name| name.as_str().to_string())
        .collect();
    let lowered: Vec<String> = names.iter().map(|name| name.to_lowercase()).collect();
    if names == lowered {
        return Ok(false);
    }
    table
        .data_mut()
        .set_column_names(lowered.iter().map(String::as_str))?;
    debug!("column names lower-cased");
    Ok(true)
}

/// Dense 0-based building ids.
fn rule_bid(table: &mut BuildingTable) -> Result<bool> {
    if table.has_column("bid") {
        return Ok(false);
    }
    let ids: Vec<i64> = (0..table.len() as i64).collect();
    table.data_mut().with_column(Column::new("bid".into(), ids))?;
    debug!("'bid' field added");
    Ok(true)
}

/// Heated area: a positive `footprint_area` (or its short DBF spelling
/// `fp_area`) wins, otherwise the polygon area in the metric frame.
fn rule_area(table: &mut BuildingTable) -> Result<bool> {
    if table.has_column("area") {
        return Ok(false);
    }
    let geometric = table.footprints().areas();
    let recorded_column = ["footprint_area", "fp_area"]
        .into_iter()
        .find(|name| table.has_column(name));
    let area: Vec<f64> = if let Some(name) = recorded_column {
        let recorded = table.data().column(name)?.cast(&DataType::Float64)?;
        recorded
            .f64()?
            .into_iter()
            .zip(&geometric)
            .map(|(recorded, &computed)| match recorded {
                Some(v) if v > 0.0 => v,
                _ => computed,
            })
            .collect()
    } else {
        geometric
    };
    table
        .data_mut()
        .with_column(Column::new("area".into(), area))?;
    debug!("'area' field added");
    Ok(true)
}

/// Shared-wall approximation: four free walls, minus one per footprint within
/// the adjacency tolerance.
fn rule_free_walls(table: &mut BuildingTable) -> Result<bool> {
    if table.has_column("free_walls") {
        return Ok(false);
    }
    let free: Vec<i32> = table
        .footprints()
        .neighbor_counts(ADJACENCY_TOLERANCE_M)
        .into_iter()
        .map(|count| (4 - count.saturating_sub(1) as i32).clamp(0, 4))
        .collect();
    table
        .data_mut()
        .with_column(Column::new("free_walls".into(), free))?;
    debug!("'free_walls' field added");
    Ok(true)
}

/// Geographic centroids, with per-row `user_lat`/`user_lon` overrides when
/// both columns are present.
fn rule_lat_lon(table: &mut BuildingTable) -> Result<bool> {
    if table.has_column("lat") {
        return Ok(false);
    }
    let centroids = table.footprints().reprojected(GEOGRAPHIC_EPSG)?.centroids();
    let mut lat: Vec<f64> = centroids.iter().map(|p| p.y()).collect();
    let mut lon: Vec<f64> = centroids.iter().map(|p| p.x()).collect();
    if table.has_column("user_lat") && table.has_column("user_lon") {
        let user_lat = table.data().column("user_lat")?.cast(&DataType::Float64)?;
        for (i, value) in user_lat.f64()?.into_iter().enumerate() {
            if let Some(v) = value {
                lat[i] = v;
            }
        }
        let user_lon = table.data().column("user_lon")?.cast(&DataType::Float64)?;
        for (i, value) in user_lon.f64()?.into_iter().enumerate() {
            if let Some(v) = value {
                lon[i] = v;
            }
        }
    }
    table
        .data_mut()
        .with_column(Column::new("lat".into(), lat))?;
    table
        .data_mut()
        .with_column(Column::new("lon".into(), lon))?;
    debug!("'lat'/'lon' fields added");
    Ok(true)
}

/// Distance to the nearest heat source: a user-supplied column null-filled
/// with the default, a heat-plant feature, or the flat default.
fn rule_dist2hp(table: &mut BuildingTable, opts: &EnrichOptions) -> Result<bool> {
    if table.has_column("dist2hp") {
        return Ok(false);
    }
    let distances: Vec<f64> = match &opts.heat_plant {
        Some(source) => heat_plant_distances(table, source, opts.default_dist2hp)?,
        None if table.has_column("user_dist_to_heat_source") => table
            .data()
            .column("user_dist_to_heat_source")?
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| v.unwrap_or(opts.default_dist2hp))
            .collect(),
        None => vec![opts.default_dist2hp; table.len()],
    };
    table
        .data_mut()
        .with_column(Column::new("dist2hp".into(), distances))?;
    debug!("'dist2hp' field added");
    Ok(true)
}

/// Centroid distance to one feature of the heat-plant file. A feature index
/// out of range falls back to the flat default.
fn heat_plant_distances(
    table: &BuildingTable,
    source: &HeatPlantSource,
    default: f64,
) -> Result<Vec<f64>> {
    let (shapes, _, epsg) = shp::read_shapefile(&source.path)?;
    let epsg = epsg.with_context(|| {
        format!(
            "cannot determine the CRS of the heat-plant file {}",
            source.path.display()
        )
    })?;
    let shapes = geom::reproject(&shapes, epsg, METRIC_EPSG)?;
    let Some(plant) = shapes.get(source.feature_index) else {
        warn!(
            index = source.feature_index,
            features = shapes.len(),
            "heat-plant feature index out of range, using the default distance"
        );
        return Ok(vec![default; table.len()]);
    };
    Ok(table
        .footprints()
        .centroids()
        .iter()
        .map(|centroid| {
            plant
                .0
                .iter()
                .map(|part| Euclidean.distance(centroid, part))
                .fold(f64::INFINITY, f64::min)
        })
        .collect())
}

/// Construction bucket to ordinal Zensus class; unknown buckets become null.
fn rule_year_class(table: &mut BuildingTable) -> Result<bool> {
    if table.has_column("year_class") {
        return Ok(false);
    }
    let construction = table.data().column("construction")?.cast(&DataType::String)?;
    let classes = lookup_int(construction.str()?, ZENSUS_YEAR_CLASSES).with_name("year_class".into());
    table.data_mut().with_column(classes.into_series())?;
    debug!("'year_class' field added");
    Ok(true)
}

/// Building typology to size class; unknown typologies become null.
fn rule_size_class(table: &mut BuildingTable) -> Result<bool> {
    if table.has_column("size_class") {
        return Ok(false);
    }
    let types = table
        .data()
        .column("building_type")?
        .cast(&DataType::String)?;
    let classes = lookup_int(types.str()?, SIZE_CLASSES).with_name("size_class".into());
    table.data_mut().with_column(classes.into_series())?;
    debug!("'size_class' field added");
    Ok(true)
}

/// Refurbishment level of one component: rename a known spelling, otherwise
/// an empty column; an optional default overwrites whatever that produced.
fn rule_ref_level(
    table: &mut BuildingTable,
    component: RefComponent,
    default: Option<i32>,
) -> Result<bool> {
    let canonical = component.column();
    match resolve_field(table.data(), canonical, &component.aliases()) {
        FieldResolution::AlreadyCanonical => return Ok(false),
        FieldResolution::SourcedFrom(alias) => {
            table.data_mut().rename(alias, canonical.into())?;
            debug!("'{canonical}' renamed from '{alias}'");
        }
        FieldResolution::Missing => {
            let empty = Series::full_null(canonical.into(), table.len(), &DataType::Int32);
            table.data_mut().with_column(empty)?;
            debug!("'{canonical}' field added");
        }
    }
    if let Some(level) = default {
        let filled = vec![level; table.len()];
        table
            .data_mut()
            .with_column(Column::new(canonical.into(), filled))?;
    }
    Ok(true)
}

fn rename_or_empty_str(
    table: &mut BuildingTable,
    canonical: &'static str,
    aliases: &[&'static str],
) -> Result<bool> {
    rename_or_empty(table, canonical, aliases, &DataType::String)
}

fn rename_or_empty_int(
    table: &mut BuildingTable,
    canonical: &'static str,
    aliases: &[&'static str],
) -> Result<bool> {
    rename_or_empty(table, canonical, aliases, &DataType::Int32)
}

fn rename_or_empty(
    table: &mut BuildingTable,
    canonical: &'static str,
    aliases: &[&'static str],
    dtype: &DataType,
) -> Result<bool> {
    match resolve_field(table.data(), canonical, aliases) {
        FieldResolution::AlreadyCanonical => Ok(false),
        FieldResolution::SourcedFrom(alias) => {
            table.data_mut().rename(alias, canonical.into())?;
            debug!("'{canonical}' renamed from '{alias}'");
            Ok(true)
        }
        FieldResolution::Missing => {
            let empty = Series::full_null(canonical.into(), table.len(), dtype);
            table.data_mut().with_column(empty)?;
            debug!("'{canonical}' field added");
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Footprints;
    use crate::geom::testutil::rect;
    use approx::assert_relative_eq;

    fn metric_table(data: DataFrame) -> BuildingTable {
        let footprints = Footprints::new(
            vec![
                rect(691_000.0, 5_334_000.0, 691_010.0, 5_334_010.0),
                rect(691_010.0, 5_334_000.0, 691_020.0, 5_334_010.0),
                rect(691_100.0, 5_334_000.0, 691_110.0, 5_334_010.0),
            ],
            METRIC_EPSG,
        );
        BuildingTable::new(footprints, data).unwrap()
    }

    fn empty_frame() -> DataFrame {
        DataFrame::new(vec![Column::new(
            "name".into(),
            &["Haus A", "Haus B", "Haus C"],
        )])
        .unwrap()
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let opts = EnrichOptions::default();
        let (enriched, modified) = enrich(metric_table(empty_frame()), &opts).unwrap();
        assert!(modified);
        for column in CANONICAL_COLUMNS {
            assert!(enriched.has_column(column), "missing {column}");
        }

        let (again, modified) = enrich(enriched.clone(), &opts).unwrap();
        assert!(!modified);
        assert!(again.data().equals_missing(enriched.data()));
    }

    #[test]
    fn positive_footprint_area_wins_over_geometry() {
        let data = DataFrame::new(vec![Column::new(
            "footprint_area".into(),
            &[250.0, -1.0, 0.0],
        )])
        .unwrap();
        let (enriched, _) = enrich(metric_table(data), &EnrichOptions::default()).unwrap();
        let area = enriched.data().column("area").unwrap().f64().unwrap();
        assert_relative_eq!(area.get(0).unwrap(), 250.0);
        assert_relative_eq!(area.get(1).unwrap(), 100.0, epsilon = 1e-6);
        assert_relative_eq!(area.get(2).unwrap(), 100.0, epsilon = 1e-6);
    }

    #[test]
    fn short_area_spelling_is_recognized() {
        let data =
            DataFrame::new(vec![Column::new("fp_area".into(), &[250.0, 0.0, 130.0])]).unwrap();
        let (enriched, _) = enrich(metric_table(data), &EnrichOptions::default()).unwrap();
        let area = enriched.data().column("area").unwrap().f64().unwrap();
        assert_relative_eq!(area.get(0).unwrap(), 250.0);
        assert_relative_eq!(area.get(1).unwrap(), 100.0, epsilon = 1e-6);
        assert_relative_eq!(area.get(2).unwrap(), 130.0);
    }

    #[test]
    fn attached_footprints_lose_free_walls() {
        let (enriched, _) = enrich(metric_table(empty_frame()), &EnrichOptions::default()).unwrap();
        let free = enriched.data().column("free_walls").unwrap().i32().unwrap();
        assert_eq!(
            free.into_iter().collect::<Vec<_>>(),
            vec![Some(3), Some(3), Some(4)]
        );
    }

    #[test]
    fn latitudes_land_near_munich() {
        let (enriched, _) = enrich(metric_table(empty_frame()), &EnrichOptions::default()).unwrap();
        let lat = enriched.data().column("lat").unwrap().f64().unwrap();
        let lon = enriched.data().column("lon").unwrap().f64().unwrap();
        assert!((47.0..49.0).contains(&lat.get(0).unwrap()));
        assert!((11.0..12.5).contains(&lon.get(0).unwrap()));
    }

    #[test]
    fn user_coordinates_override_computed_ones() {
        let data = DataFrame::new(vec![
            Column::new("user_lat".into(), &[Some(48.0), None, None]),
            Column::new("user_lon".into(), &[Some(11.0), None, None]),
        ])
        .unwrap();
        let (enriched, _) = enrich(metric_table(data), &EnrichOptions::default()).unwrap();
        let lat = enriched.data().column("lat").unwrap().f64().unwrap();
        assert_relative_eq!(lat.get(0).unwrap(), 48.0);
        assert!(lat.get(1).unwrap() > 48.0);
    }

    #[test]
    fn user_distance_column_is_null_filled_with_the_default() {
        let data = DataFrame::new(vec![Column::new(
            "user_dist_to_heat_source".into(),
            &[Some(120.0), None, Some(80.0)],
        )])
        .unwrap();
        let mut opts = EnrichOptions::default();
        opts.default_dist2hp = 7.5;
        let (enriched, _) = enrich(metric_table(data), &opts).unwrap();
        let dist = enriched.data().column("dist2hp").unwrap().f64().unwrap();
        assert_eq!(
            dist.into_iter().collect::<Vec<_>>(),
            vec![Some(120.0), Some(7.5), Some(80.0)]
        );
    }

    #[test]
    fn construction_buckets_map_to_year_classes() {
        let data = DataFrame::new(vec![Column::new(
            "year".into(),
            &["-1919", "2009-", "somewhen"],
        )])
        .unwrap();
        let (enriched, _) = enrich(metric_table(data), &EnrichOptions::default()).unwrap();
        assert!(enriched.has_column("construction"));
        let classes = enriched.data().column("year_class").unwrap().i32().unwrap();
        assert_eq!(
            classes.into_iter().collect::<Vec<_>>(),
            vec![Some(0), Some(9), None]
        );
    }

    #[test]
    fn alternate_spellings_are_renamed_not_recomputed() {
        let data = DataFrame::new(vec![
            Column::new("BTYPE".into(), &["SFH", "MFH", "Palace"]),
            Column::new("houses_per_building".into(), &[1i32, 6, 1]),
        ])
        .unwrap();
        let (enriched, modified) = enrich(metric_table(data), &EnrichOptions::default()).unwrap();
        assert!(modified);
        assert!(!enriched.has_column("btype"));
        let size = enriched.data().column("size_class").unwrap().i32().unwrap();
        assert_eq!(
            size.into_iter().collect::<Vec<_>>(),
            vec![Some(0), Some(2), None]
        );
        let dwellings = enriched.data().column("dwellings").unwrap().i32().unwrap();
        assert_eq!(dwellings.get(1), Some(6));
    }

    #[test]
    fn ref_level_default_fills_missing_components_only() {
        let data = DataFrame::new(vec![Column::new(
            "ref_level_roof".into(),
            &[0i32, 1, 2],
        )])
        .unwrap();
        let mut opts = EnrichOptions::default();
        opts.ref_level_default = Some(2);
        let (enriched, _) = enrich(metric_table(data), &opts).unwrap();

        // the pre-existing canonical column is untouched
        let roof = enriched
            .data()
            .column("ref_level_roof")
            .unwrap()
            .i32()
            .unwrap();
        assert_eq!(roof.into_iter().collect::<Vec<_>>(), vec![Some(0), Some(1), Some(2)]);
        // the missing ones got the forced default
        let wall = enriched
            .data()
            .column("ref_level_wall")
            .unwrap()
            .i32()
            .unwrap();
        assert_eq!(wall.into_iter().collect::<Vec<_>>(), vec![Some(2), Some(2), Some(2)]);
    }

    #[test]
    fn out_of_range_ref_level_default_is_rejected() {
        let mut opts = EnrichOptions::default();
        opts.ref_level_default = Some(0);
        assert!(enrich(metric_table(empty_frame()), &opts).is_err());
    }
}
