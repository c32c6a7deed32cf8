//! CRS transforms between the fixed frames of the pipeline.

use anyhow::{Result, anyhow};
use geo::{Coord, MapCoords, MultiPolygon};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::error::HeatprepError;

/// Projected CRS all areas and distances are computed in (UTM 32N, meters).
pub const METRIC_EPSG: u32 = 32632;

/// Geographic CRS latitudes and longitudes are expressed in (degrees).
pub const GEOGRAPHIC_EPSG: u32 = 4326;

/// PROJ.4 definition for a supported EPSG code.
fn proj4_definition(epsg: u32) -> Result<&'static str> {
    Ok(match epsg {
        4326 => "+proj=longlat +datum=WGS84 +no_defs",
        4258 => "+proj=longlat +ellps=GRS80 +no_defs",
        32632 => "+proj=utm +zone=32 +datum=WGS84 +units=m +no_defs",
        32633 => "+proj=utm +zone=33 +datum=WGS84 +units=m +no_defs",
        25832 => "+proj=utm +zone=32 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
        25833 => "+proj=utm +zone=33 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
        31468 => {
            "+proj=tmerc +lat_0=0 +lon_0=12 +k=1 +x_0=4500000 +y_0=0 +ellps=bessel \
             +towgs84=598.1,73.7,418.2,0.202,0.045,-2.455,6.7 +units=m +no_defs"
        }
        3857 => {
            "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 \
             +units=m +no_defs"
        }
        other => return Err(HeatprepError::UnsupportedCrs(other).into()),
    })
}

/// Reproject every coordinate of `shapes` from one EPSG frame to another.
pub(crate) fn reproject(
    shapes: &[MultiPolygon<f64>],
    from_epsg: u32,
    to_epsg: u32,
) -> Result<Vec<MultiPolygon<f64>>> {
    if from_epsg == to_epsg {
        return Ok(shapes.to_vec());
    }
    let from = Proj::from_proj_string(proj4_definition(from_epsg)?)
        .map_err(|e| anyhow!("failed to build projection for EPSG:{from_epsg}: {e}"))?;
    let to = Proj::from_proj_string(proj4_definition(to_epsg)?)
        .map_err(|e| anyhow!("failed to build projection for EPSG:{to_epsg}: {e}"))?;

    shapes
        .iter()
        .map(|shape| shape.try_map_coords(|coord| transform_coord(&from, &to, coord)))
        .collect()
}

/// proj4rs works in radians for geographic frames; degrees in, degrees out.
fn transform_coord(from: &Proj, to: &Proj, coord: Coord<f64>) -> Result<Coord<f64>> {
    let mut point = if from.is_latlong() {
        (coord.x.to_radians(), coord.y.to_radians(), 0.0)
    } else {
        (coord.x, coord.y, 0.0)
    };
    transform(from, to, &mut point)
        .map_err(|e| anyhow!("CRS transform failed at ({}, {}): {e}", coord.x, coord.y))?;
    Ok(if to.is_latlong() {
        Coord {
            x: point.0.to_degrees(),
            y: point.1.to_degrees(),
        }
    } else {
        Coord {
            x: point.0,
            y: point.1,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::testutil::rect;
    use approx::assert_relative_eq;

    #[test]
    fn geographic_to_metric_and_back() {
        // a block-sized square near Munich
        let shapes = vec![rect(11.57, 48.14, 11.58, 48.15)];
        let metric = reproject(&shapes, GEOGRAPHIC_EPSG, METRIC_EPSG).unwrap();

        let easting = metric[0].0[0].exterior().0[0].x;
        let northing = metric[0].0[0].exterior().0[0].y;
        assert!((600_000.0..800_000.0).contains(&easting), "easting {easting}");
        assert!(
            (5_000_000.0..5_500_000.0).contains(&northing),
            "northing {northing}"
        );

        let back = reproject(&metric, METRIC_EPSG, GEOGRAPHIC_EPSG).unwrap();
        let coord = back[0].0[0].exterior().0[0];
        assert_relative_eq!(coord.x, 11.57, epsilon = 1e-6);
        assert_relative_eq!(coord.y, 48.14, epsilon = 1e-6);
    }

    #[test]
    fn identity_reprojection_is_a_copy() {
        let shapes = vec![rect(0.0, 0.0, 1.0, 1.0)];
        let same = reproject(&shapes, METRIC_EPSG, METRIC_EPSG).unwrap();
        assert_eq!(same, shapes);
    }

    #[test]
    fn unknown_epsg_is_a_typed_error() {
        let err = reproject(&[rect(0.0, 0.0, 1.0, 1.0)], 9999, METRIC_EPSG).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::HeatprepError>(),
            Some(crate::HeatprepError::UnsupportedCrs(9999))
        ));
    }
}
