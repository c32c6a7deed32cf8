//! Shapefile reading and writing for building and boundary datasets.
//!
//! Attribute records travel as a polars [`DataFrame`], geometries as
//! [`geo::MultiPolygon`]. The CRS is carried as an EPSG code sniffed from the
//! `.prj` sidecar, and written back for the codes the projection table knows.
//!
//! DBF field names are limited to 10 bytes, so long canonical column names
//! are stored under fixed short aliases. The short names are exactly the
//! alternate spellings the attribute enricher recognizes, which makes a
//! write/read cycle of an enriched partition lossless.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail, ensure};
use polars::prelude::*;
use shapefile::dbase::{self, FieldValue, Record};
use shapefile::{PolygonRing, Shape};

use super::ensure_dir_exists;

/// Long canonical column names and their DBF-safe spellings.
const DBF_ALIASES: &[(&str, &str)] = &[
    ("construction", "constructi"),
    ("building_type", "building_t"),
    ("footprint_area", "fp_area"),
    ("construction_year", "constr_yr"),
    ("ref_level_roof", "ref_roof"),
    ("ref_level_wall", "ref_wall"),
    ("ref_level_floor", "ref_floor"),
    ("ref_level_window", "ref_window"),
];

/// WKT fragments that identify a CRS in a `.prj` sidecar. Projected systems
/// come first so their geographic base does not shadow them.
const PRJ_MARKERS: &[(&str, u32)] = &[
    ("UTM_Zone_32N", 32632),
    ("UTM zone 32N", 32632),
    ("UTM_Zone_33N", 32633),
    ("UTM zone 33N", 32633),
    ("Gauss_Zone_4", 31468),
    ("Gauss-Kruger zone 4", 31468),
    ("Web_Mercator", 3857),
    ("Pseudo-Mercator", 3857),
    ("GCS_ETRS_1989", 4258),
    ("ETRS89", 4258),
    ("GCS_WGS_1984", 4326),
    ("WGS_1984", 4326),
    ("WGS 84", 4326),
];

/// ESRI WKT bodies emitted for the CRS codes the pipeline produces itself.
const PRJ_WKT: &[(u32, &str)] = &[
    (
        4326,
        r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#,
    ),
    (
        4258,
        r#"GEOGCS["GCS_ETRS_1989",DATUM["D_ETRS_1989",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#,
    ),
    (
        32632,
        r#"PROJCS["WGS_1984_UTM_Zone_32N",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",9.0],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#,
    ),
    (
        32633,
        r#"PROJCS["WGS_1984_UTM_Zone_33N",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",15.0],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#,
    ),
    (
        25832,
        r#"PROJCS["ETRS_1989_UTM_Zone_32N",GEOGCS["GCS_ETRS_1989",DATUM["D_ETRS_1989",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",9.0],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#,
    ),
    (
        25833,
        r#"PROJCS["ETRS_1989_UTM_Zone_33N",GEOGCS["GCS_ETRS_1989",DATUM["D_ETRS_1989",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",15.0],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#,
    ),
];

/// Read a polygon shapefile into geometries, attributes and the EPSG code of
/// its `.prj` sidecar (when present and recognized).
///
/// Attribute columns come back in sorted name order so downstream schemas are
/// deterministic regardless of the DBF field layout.
pub fn read_shapefile(path: &Path) -> Result<(Vec<geo::MultiPolygon<f64>>, DataFrame, Option<u32>)> {
    let mut reader = shapefile::Reader::from_path(path)
        .with_context(|| format!("failed to open shapefile: {}", path.display()))?;

    let mut shapes = Vec::new();
    let mut records: Vec<Record> = Vec::new();
    for item in reader.iter_shapes_and_records() {
        let (shape, record) =
            item.with_context(|| format!("error reading feature from {}", path.display()))?;
        let geometry = match shape {
            Shape::Polygon(polygon) => polygon_to_geo(&polygon),
            other => bail!(
                "unsupported geometry type {} in {}",
                other,
                path.display()
            ),
        };
        shapes.push(geometry);
        records.push(record);
    }

    let data = records_to_dataframe(&records)?;
    Ok((shapes, data, epsg_from_prj(path)))
}

/// Write geometries and attributes as `.shp`/`.shx`/`.dbf`, plus a `.prj`
/// sidecar when the EPSG code has a known WKT body.
pub fn write_shapefile(
    path: &Path,
    shapes: &[geo::MultiPolygon<f64>],
    data: &DataFrame,
    epsg: Option<u32>,
) -> Result<()> {
    ensure!(
        shapes.len() == data.height(),
        "row/geometry count mismatch: {} rows vs {} shapes",
        data.height(),
        shapes.len()
    );
    if let Some(parent) = path.parent() {
        ensure_dir_exists(parent)?;
    }

    // One typed accessor per column, under its DBF-safe name.
    enum OutColumn {
        Str(StringChunked),
        Bool(BooleanChunked),
        Num(Float64Chunked),
    }

    let mut taken = BTreeSet::new();
    let mut builder = dbase::TableWriterBuilder::new();
    let mut columns: Vec<(String, OutColumn)> = Vec::new();
    for column in data.get_columns() {
        let short = dbf_field_name(column.name().as_str(), &mut taken);
        let field_name: dbase::FieldName = short
            .as_str()
            .try_into()
            .map_err(|e| anyhow!("invalid DBF field name {short:?}: {e}"))?;
        let out = match column.dtype() {
            DataType::String => {
                let values = column.str()?.clone();
                let width = values
                    .into_iter()
                    .flatten()
                    .map(str::len)
                    .max()
                    .unwrap_or(0)
                    .clamp(1, 254) as u8;
                builder = builder.add_character_field(field_name, width);
                OutColumn::Str(values)
            }
            DataType::Boolean => {
                builder = builder.add_logical_field(field_name);
                OutColumn::Bool(column.bool()?.clone())
            }
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Null => {
                builder = builder.add_numeric_field(field_name, 20, 8);
                OutColumn::Num(column.cast(&DataType::Float64)?.f64()?.clone())
            }
            other => bail!(
                "column {:?}: dtype {other:?} cannot be stored in a DBF table",
                column.name()
            ),
        };
        columns.push((short, out));
    }

    let mut writer = shapefile::Writer::from_path(path, builder)
        .with_context(|| format!("failed to create shapefile: {}", path.display()))?;
    for (row, shape) in shapes.iter().enumerate() {
        let mut record = Record::default();
        for (name, values) in &columns {
            let value = match values {
                OutColumn::Str(v) => FieldValue::Character(v.get(row).map(str::to_string)),
                OutColumn::Bool(v) => FieldValue::Logical(v.get(row)),
                OutColumn::Num(v) => FieldValue::Numeric(v.get(row)),
            };
            record.insert(name.clone(), value);
        }
        writer
            .write_shape_and_record(&geo_to_polygon(shape), &record)
            .with_context(|| format!("failed to write feature {row} to {}", path.display()))?;
    }
    drop(writer);

    if let Some(code) = epsg {
        if let Some((_, wkt)) = PRJ_WKT.iter().find(|(c, _)| *c == code) {
            fs::write(path.with_extension("prj"), wkt)
                .with_context(|| format!("failed to write .prj for {}", path.display()))?;
        }
    }
    Ok(())
}

/// DBF-safe field name: fixed alias if one exists, otherwise the first ten
/// characters, with a numeric suffix to break collisions.
fn dbf_field_name(name: &str, taken: &mut BTreeSet<String>) -> String {
    let mut short = DBF_ALIASES
        .iter()
        .find(|(long, _)| *long == name)
        .map(|(_, alias)| (*alias).to_string())
        .unwrap_or_else(|| name.chars().take(10).collect());
    let mut suffix = 1;
    while !taken.insert(short.clone()) {
        let base: String = name.chars().take(8).collect();
        short = format!("{base}_{suffix}");
        suffix += 1;
    }
    short
}

fn epsg_from_prj(path: &Path) -> Option<u32> {
    let wkt = fs::read_to_string(path.with_extension("prj")).ok()?;
    PRJ_MARKERS
        .iter()
        .find(|(marker, _)| wkt.contains(marker))
        .map(|(_, code)| *code)
}

/// Columns are typed from the first record: Character to String, numerics to
/// Float64, Integer to Int32, Logical to Boolean, Date to an ISO string.
fn records_to_dataframe(records: &[Record]) -> Result<DataFrame> {
    let Some(first) = records.first() else {
        return Ok(DataFrame::empty());
    };
    let mut names: Vec<String> = first.clone().into_iter().map(|(name, _)| name).collect();
    names.sort_unstable();

    let mut columns = Vec::with_capacity(names.len());
    for name in &names {
        let column = match first.get(name) {
            Some(FieldValue::Character(_) | FieldValue::Memo(_)) => Column::new(
                name.as_str().into(),
                each_record(records, name, |value| match value {
                    FieldValue::Character(v) => Ok(v.clone()),
                    FieldValue::Memo(v) => Ok(Some(v.clone())),
                    other => bail!("expected a character value, got {other:?}"),
                })?,
            ),
            Some(
                FieldValue::Numeric(_)
                | FieldValue::Float(_)
                | FieldValue::Double(_)
                | FieldValue::Currency(_),
            ) => Column::new(
                name.as_str().into(),
                each_record(records, name, |value| match value {
                    FieldValue::Numeric(v) => Ok(*v),
                    FieldValue::Float(v) => Ok(v.map(f64::from)),
                    FieldValue::Double(v) => Ok(Some(*v)),
                    FieldValue::Currency(v) => Ok(Some(*v)),
                    other => bail!("expected a numeric value, got {other:?}"),
                })?,
            ),
            Some(FieldValue::Integer(_)) => Column::new(
                name.as_str().into(),
                each_record(records, name, |value| match value {
                    FieldValue::Integer(v) => Ok(*v),
                    other => bail!("expected an integer value, got {other:?}"),
                })?,
            ),
            Some(FieldValue::Logical(_)) => Column::new(
                name.as_str().into(),
                each_record(records, name, |value| match value {
                    FieldValue::Logical(v) => Ok(*v),
                    other => bail!("expected a logical value, got {other:?}"),
                })?,
            ),
            Some(FieldValue::Date(_)) => Column::new(
                name.as_str().into(),
                each_record(records, name, |value| match value {
                    FieldValue::Date(v) => Ok(v.map(|date| {
                        format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
                    })),
                    other => bail!("expected a date value, got {other:?}"),
                })?,
            ),
            other => bail!("field {name:?}: unsupported DBF value {other:?}"),
        };
        columns.push(column);
    }
    Ok(DataFrame::new(columns)?)
}

fn each_record<T>(
    records: &[Record],
    name: &str,
    mut convert: impl FnMut(&FieldValue) -> Result<T>,
) -> Result<Vec<T>> {
    records
        .iter()
        .map(|record| {
            let value = record
                .get(name)
                .with_context(|| format!("field {name:?} missing from a record"))?;
            convert(value).with_context(|| format!("field {name:?}"))
        })
        .collect()
}

/// Group the flat ring list of a shapefile polygon into `geo` polygons.
///
/// Shapefile exteriors wind clockwise (negative shoelace sum) and holes
/// counter-clockwise; holes belong to the most recent exterior.
fn polygon_to_geo(polygon: &shapefile::Polygon) -> geo::MultiPolygon<f64> {
    let mut parts: Vec<geo::Polygon<f64>> = Vec::new();
    let mut exterior: Option<geo::LineString<f64>> = None;
    let mut holes: Vec<geo::LineString<f64>> = Vec::new();

    for ring in polygon.rings() {
        let mut coords: Vec<geo::Coord<f64>> = ring
            .points()
            .iter()
            .map(|p| geo::Coord { x: p.x, y: p.y })
            .collect();
        if coords.first() != coords.last() {
            if let Some(&first) = coords.first() {
                coords.push(first);
            }
        }
        let winding = shoelace_sum(&coords);
        let ring = geo::LineString(coords);
        if winding < 0.0 {
            if let Some(previous) = exterior.replace(ring) {
                parts.push(geo::Polygon::new(previous, std::mem::take(&mut holes)));
            }
        } else {
            holes.push(ring);
        }
    }
    if let Some(last) = exterior {
        parts.push(geo::Polygon::new(last, holes));
    }
    geo::MultiPolygon(parts)
}

fn geo_to_polygon(shape: &geo::MultiPolygon<f64>) -> shapefile::Polygon {
    let mut rings = Vec::new();
    for polygon in &shape.0 {
        rings.push(PolygonRing::Outer(ring_points(polygon.exterior(), true)));
        for hole in polygon.interiors() {
            rings.push(PolygonRing::Inner(ring_points(hole, false)));
        }
    }
    shapefile::Polygon::with_rings(rings)
}

/// Closed point list with the winding a shapefile ring of this role expects.
fn ring_points(ring: &geo::LineString<f64>, clockwise: bool) -> Vec<shapefile::Point> {
    let mut points: Vec<shapefile::Point> = ring
        .points()
        .map(|p| shapefile::Point { x: p.x(), y: p.y() })
        .collect();
    if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
        if first.x != last.x || first.y != last.y {
            points.push(first);
        }
    }
    let coords: Vec<geo::Coord<f64>> = points
        .iter()
        .map(|p| geo::Coord { x: p.x, y: p.y })
        .collect();
    if (shoelace_sum(&coords) < 0.0) != clockwise {
        points.reverse();
    }
    points
}

fn shoelace_sum(coords: &[geo::Coord<f64>]) -> f64 {
    coords
        .windows(2)
        .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn square(x0: f64, y0: f64, size: f64) -> geo::MultiPolygon<f64> {
        geo::MultiPolygon(vec![geo::Polygon::new(
            geo::LineString(vec![
                geo::Coord { x: x0, y: y0 },
                geo::Coord { x: x0 + size, y: y0 },
                geo::Coord { x: x0 + size, y: y0 + size },
                geo::Coord { x: x0, y: y0 + size },
                geo::Coord { x: x0, y: y0 },
            ]),
            vec![],
        )])
    }

    #[test]
    fn round_trip_preserves_rows_and_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("part.shp");
        let shapes = vec![square(0.0, 0.0, 10.0), square(100.0, 0.0, 20.0)];
        let data = DataFrame::new(vec![
            Column::new("use".into(), &["Residential", "Commercial"]),
            Column::new("area".into(), &[100.0, 400.0]),
        ])
        .unwrap();

        write_shapefile(&path, &shapes, &data, Some(32632)).unwrap();
        let (read_shapes, read_data, epsg) = read_shapefile(&path).unwrap();

        assert_eq!(read_shapes.len(), 2);
        assert_eq!(epsg, Some(32632));
        assert_eq!(
            read_data.column("use").unwrap().str().unwrap().get(1),
            Some("Commercial")
        );
        assert_eq!(
            read_data.column("area").unwrap().f64().unwrap().get(0),
            Some(100.0)
        );
        // polygon survives with the same vertex count
        assert_eq!(read_shapes[0].0.len(), 1);
        assert_eq!(read_shapes[0].0[0].exterior().0.len(), 5);
    }

    #[test]
    fn long_names_go_through_the_alias_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alias.shp");
        let data = DataFrame::new(vec![
            Column::new("ref_level_roof".into(), &[1i32]),
            Column::new("building_type".into(), &["SFH"]),
        ])
        .unwrap();

        write_shapefile(&path, &[square(0.0, 0.0, 1.0)], &data, None).unwrap();
        let (_, read_data, epsg) = read_shapefile(&path).unwrap();

        assert!(epsg.is_none());
        assert!(read_data.column("ref_roof").is_ok());
        assert!(read_data.column("building_t").is_ok());
    }

    #[test]
    fn truncated_names_are_deduplicated() {
        let mut taken = BTreeSet::new();
        assert_eq!(dbf_field_name("einwohner", &mut taken), "einwohner");
        assert_eq!(dbf_field_name("a_very_long_name", &mut taken), "a_very_lon");
        assert_eq!(dbf_field_name("a_very_long_other", &mut taken), "a_very_l_1");
    }

    #[test]
    fn holes_survive_the_ring_grouping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("holes.shp");
        let outer = geo::LineString(vec![
            geo::Coord { x: 0.0, y: 0.0 },
            geo::Coord { x: 10.0, y: 0.0 },
            geo::Coord { x: 10.0, y: 10.0 },
            geo::Coord { x: 0.0, y: 10.0 },
            geo::Coord { x: 0.0, y: 0.0 },
        ]);
        let hole = geo::LineString(vec![
            geo::Coord { x: 4.0, y: 4.0 },
            geo::Coord { x: 6.0, y: 4.0 },
            geo::Coord { x: 6.0, y: 6.0 },
            geo::Coord { x: 4.0, y: 6.0 },
            geo::Coord { x: 4.0, y: 4.0 },
        ]);
        let shape = geo::MultiPolygon(vec![geo::Polygon::new(outer, vec![hole])]);
        let data = DataFrame::new(vec![Column::new("bid".into(), &[0i64])]).unwrap();

        write_shapefile(&path, &[shape], &data, None).unwrap();
        let (read_shapes, _, _) = read_shapefile(&path).unwrap();
        assert_eq!(read_shapes[0].0.len(), 1);
        assert_eq!(read_shapes[0].0[0].interiors().len(), 1);
    }
}
