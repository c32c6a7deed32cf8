#![doc = "Heatprep public API"]
//! Data preparation for urban heat-demand simulation: completion of the
//! canonical building-attribute schema, postal-code (PLZ) partitioning of a
//! regional building database, and the simulator CSV interchange format.

mod buildings;
mod common;
mod config;
mod error;
mod geom;
mod index;
mod regions;
mod uhp;

#[doc(inline)]
pub use buildings::{BuildingTable, BuildingUse, RefComponent, classify, enrich};

#[doc(inline)]
pub use config::{Config, EnrichOptions, HeatPlantSource};

#[doc(inline)]
pub use error::HeatprepError;

#[doc(inline)]
pub use geom::{Footprints, GEOGRAPHIC_EPSG, METRIC_EPSG};

#[doc(inline)]
pub use index::{
    PlzEntry, PlzIndex, UseFilter, build_index, compute_buildings_for_plz, query,
    save_query_result,
};

#[doc(inline)]
pub use regions::RegionSet;

#[doc(inline)]
pub use uhp::{
    UHP_COLUMNS, UHP_REQUIRED_COLUMNS, compute_uhp_input_for_plz, prepare_uhp_buildings,
    read_uhp_csv, write_uhp_csv,
};

pub use common::shp::{read_shapefile, write_shapefile};
