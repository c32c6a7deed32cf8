mod footprints;
mod proj;

pub use footprints::Footprints;
pub use proj::{GEOGRAPHIC_EPSG, METRIC_EPSG};
pub(crate) use proj::reproject;
