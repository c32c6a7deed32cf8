use std::path::PathBuf;

use anyhow::Result;

use crate::error::HeatprepError;

/// Filesystem layout of a building-database workspace.
///
/// Every component of the crate takes the configuration explicitly; nothing
/// reads process-wide state. [`Config::new`] reproduces the conventional
/// layout below a single base directory, and any field can be overridden by
/// plain struct update afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory that index file references are stored relative to.
    pub base_dir: PathBuf,
    /// Root of the raw building-database tree, one shapefile per municipality.
    pub bbd_root: PathBuf,
    /// Boundary shapefile with one polygon per postal code (`plz` attribute).
    pub plz_file: PathBuf,
    /// Root of the mirrored tree that enriched partitions are written to.
    pub enriched_root: PathBuf,
    /// Location of the persisted PLZ index document.
    pub index_path: PathBuf,
    /// Scratch directory for query results and simulator input files.
    pub temp_dir: PathBuf,
}

impl Config {
    /// Conventional workspace layout below `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base = base_dir.into();
        Self {
            bbd_root: base.join("BBD"),
            plz_file: base.join("data").join("plz").join("plz-5stellig.shp"),
            enriched_root: base.join("data").join("bbd"),
            index_path: base.join("data").join("plz_to_munc_dict.json"),
            temp_dir: base.join("temp"),
            base_dir: base,
        }
    }
}

/// Tunables for the attribute enricher.
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Distance to the nearest heat source when no other source applies, in
    /// meters.
    pub default_dist2hp: f64,
    /// Optional heat-plant geometry used to compute `dist2hp` per building.
    pub heat_plant: Option<HeatPlantSource>,
    /// When set, forces this refurbishment level onto every component whose
    /// canonical column was absent from the input.
    pub ref_level_default: Option<i32>,
}

/// One feature of a heat-plant shapefile.
#[derive(Debug, Clone)]
pub struct HeatPlantSource {
    pub path: PathBuf,
    pub feature_index: usize,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            default_dist2hp: 0.0,
            heat_plant: None,
            ref_level_default: None,
        }
    }
}

impl EnrichOptions {
    /// Range-check the options before any work happens.
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = self.ref_level_default {
            if !(1..=3).contains(&level) {
                return Err(HeatprepError::OutsideRange {
                    what: "ref_level_default",
                    value: level as i64,
                    min: 1,
                    max: 3,
                }
                .into());
            }
        }
        Ok(())
    }
}
