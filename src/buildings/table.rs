use std::path::Path;

use anyhow::{Context, Result, ensure};
use polars::prelude::*;

use crate::common::shp;
use crate::geom::Footprints;

/// A partition of building records: one attribute row per footprint.
///
/// Attributes and geometry are kept aligned by row position; every operation
/// that drops, duplicates or reorders rows goes through this type so the two
/// never drift apart.
#[derive(Debug, Clone)]
pub struct BuildingTable {
    data: DataFrame,
    footprints: Footprints,
}

impl BuildingTable {
    pub fn new(footprints: Footprints, data: DataFrame) -> Result<Self> {
        ensure!(
            footprints.len() == data.height(),
            "row/geometry count mismatch: {} rows vs {} footprints",
            data.height(),
            footprints.len()
        );
        Ok(Self { data, footprints })
    }

    /// Read a partition from a shapefile. The CRS must be identifiable from
    /// the `.prj` sidecar.
    pub fn from_shapefile(path: &Path) -> Result<Self> {
        let (shapes, data, epsg) = shp::read_shapefile(path)?;
        let epsg = epsg.with_context(|| {
            format!(
                "cannot determine the CRS of {}: missing or unrecognized .prj",
                path.display()
            )
        })?;
        Self::new(Footprints::new(shapes, epsg), data)
    }

    pub fn to_shapefile(&self, path: &Path) -> Result<()> {
        shp::write_shapefile(
            path,
            self.footprints.shapes(),
            &self.data,
            Some(self.footprints.epsg()),
        )
    }

    pub fn len(&self) -> usize {
        self.data.height()
    }

    pub fn is_empty(&self) -> bool {
        self.data.height() == 0
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn footprints(&self) -> &Footprints {
        &self.footprints
    }

    pub fn epsg(&self) -> u32 {
        self.footprints.epsg()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.data.column(name).is_ok()
    }

    /// Height-preserving column edits only; row changes go through
    /// [`filter`](Self::filter), [`take`](Self::take) and
    /// [`vstack`](Self::vstack).
    pub(crate) fn data_mut(&mut self) -> &mut DataFrame {
        &mut self.data
    }

    pub fn reprojected(&self, to_epsg: u32) -> Result<Self> {
        Ok(Self {
            data: self.data.clone(),
            footprints: self.footprints.reprojected(to_epsg)?,
        })
    }

    /// Keep the rows selected by `mask`; null mask entries drop the row.
    pub fn filter(&self, mask: &BooleanChunked) -> Result<Self> {
        let data = self.data.filter(mask)?;
        let indices: Vec<usize> = mask
            .into_iter()
            .enumerate()
            .filter(|(_, keep)| keep.unwrap_or(false))
            .map(|(i, _)| i)
            .collect();
        Self::new(self.footprints.take(&indices), data)
    }

    /// Rows selected by index, duplicates allowed (spatial-join fan-out).
    pub fn take(&self, indices: &[usize]) -> Result<Self> {
        let idx = IdxCa::from_vec(
            "idx".into(),
            indices.iter().map(|&i| i as IdxSize).collect(),
        );
        Self::new(self.footprints.take(indices), self.data.take(&idx)?)
    }

    /// Append another partition's rows; schemas and frames must match.
    pub fn vstack(&self, other: &BuildingTable) -> Result<Self> {
        Self::new(
            self.footprints.concat(other.footprints())?,
            self.data.vstack(other.data())?,
        )
    }

    /// Append another partition's rows, unioning the schemas; a column only
    /// one side carries is null-filled on the other.
    pub fn vstack_aligned(&self, other: &BuildingTable) -> Result<Self> {
        let mut left = self.data.clone();
        let mut right = other.data.clone();
        for column in other.data.get_columns() {
            if left.column(column.name()).is_err() {
                left.with_column(Series::full_null(
                    column.name().clone(),
                    left.height(),
                    column.dtype(),
                ))?;
            }
        }
        for column in self.data.get_columns() {
            if right.column(column.name()).is_err() {
                right.with_column(Series::full_null(
                    column.name().clone(),
                    right.height(),
                    column.dtype(),
                ))?;
            }
        }
        let right = right.select(left.get_column_names_owned())?;
        Self::new(self.footprints.concat(other.footprints())?, left.vstack(&right)?)
    }
}
