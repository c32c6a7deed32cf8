//! Postal-code boundary regions and the building-to-region spatial joins.

use std::path::Path;

use anyhow::{Context, Result};
use geo::Point;
use polars::prelude::*;
use tracing::debug;

use crate::buildings::BuildingTable;
use crate::common::shp;
use crate::geom::{Footprints, GEOGRAPHIC_EPSG};

/// The postal-code regions of a boundary dataset, held in the geographic
/// frame (EPSG:4326) regardless of the file's own CRS.
///
/// Only the code is ever carried over into building tables; the boundary
/// file's census attributes (`note`, `einwohner`, `qkm`) stay behind.
#[derive(Debug, Clone)]
pub struct RegionSet {
    codes: Vec<Option<String>>,
    data: DataFrame,
    footprints: Footprints,
}

impl RegionSet {
    /// Load a boundary shapefile with one polygon per postal code. A file
    /// without a recognizable `.prj` is taken to be geographic already.
    pub fn load(path: &Path) -> Result<Self> {
        let (shapes, data, epsg) = shp::read_shapefile(path)
            .with_context(|| format!("failed to read PLZ boundary file: {}", path.display()))?;
        let epsg = epsg.unwrap_or(GEOGRAPHIC_EPSG);
        let footprints = Footprints::new(shapes, epsg).reprojected(GEOGRAPHIC_EPSG)?;
        let plz = data
            .column("plz")
            .context("boundary file has no 'plz' attribute")?
            .cast(&DataType::String)?;
        let codes = plz
            .str()?
            .into_iter()
            .map(|code| code.map(str::to_string))
            .collect();
        debug!(regions = footprints.len(), "PLZ boundary file loaded");
        Ok(Self {
            codes,
            data,
            footprints,
        })
    }

    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn footprints(&self) -> &Footprints {
        &self.footprints
    }

    /// Exact-match filter on the postal code. An unknown code gives an empty
    /// set, not an error.
    pub fn lookup(&self, code: &str) -> Result<RegionSet> {
        let keep: Vec<usize> = self
            .codes
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_deref() == Some(code))
            .map(|(i, _)| i)
            .collect();
        let idx = IdxCa::from_vec("idx".into(), keep.iter().map(|&i| i as IdxSize).collect());
        Ok(RegionSet {
            codes: keep.iter().map(|&i| self.codes[i].clone()).collect(),
            data: self.data.take(&idx)?,
            footprints: self.footprints.take(&keep),
        })
    }

    /// Centroid of the region with this code, as lon/lat.
    pub fn centroid(&self, code: &str) -> Result<Option<Point<f64>>> {
        let matched = self.lookup(code)?;
        Ok(matched.footprints.centroids().first().copied())
    }

    /// Attach a `plz` column via an intersects-join.
    ///
    /// A footprint straddling several regions produces one output row per
    /// matched region; a footprint matching nothing keeps one row with a
    /// null code. A `within`-join would instead lose every building touching
    /// a boundary, which is why intersection is used.
    pub fn assign_codes(&self, table: &BuildingTable) -> Result<BuildingTable> {
        let geographic = table.footprints().reprojected(GEOGRAPHIC_EPSG)?;
        let mut indices = Vec::with_capacity(table.len());
        let mut codes: Vec<Option<String>> = Vec::with_capacity(table.len());
        for (row, shape) in geographic.shapes().iter().enumerate() {
            let matched = self.footprints.intersecting(shape);
            if matched.is_empty() {
                indices.push(row);
                codes.push(None);
            } else {
                for region in matched {
                    indices.push(row);
                    codes.push(self.codes[region].clone());
                }
            }
        }
        let mut joined = table.take(&indices)?;
        joined
            .data_mut()
            .with_column(Column::new("plz".into(), codes))?;
        Ok(joined)
    }

    /// Assign exactly one code per building from its footprint centroid.
    ///
    /// Avoids the fan-out of [`assign_codes`](Self::assign_codes) at the cost
    /// of mis-assigning a building whose centroid falls just across the
    /// boundary; centroids outside every region get a null code.
    pub fn assign_codes_by_centroid(&self, table: &BuildingTable) -> Result<BuildingTable> {
        let geographic = table.footprints().reprojected(GEOGRAPHIC_EPSG)?;
        let codes: Vec<Option<String>> = geographic
            .centroids()
            .iter()
            .map(|centroid| {
                self.footprints
                    .containing(*centroid)
                    .and_then(|region| self.codes[region].clone())
            })
            .collect();
        let mut joined = table.clone();
        joined
            .data_mut()
            .with_column(Column::new("plz".into(), codes))?;
        Ok(joined)
    }
}
