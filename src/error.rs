use thiserror::Error;

/// Typed failures callers are expected to match on.
///
/// Everything else (I/O, malformed shapefiles, schema mismatches) is reported
/// through [`anyhow::Error`] with context; these variants are recoverable via
/// `downcast_ref` on the propagated error.
#[derive(Debug, Error)]
pub enum HeatprepError {
    /// The building database has no rows for the code, even after a full
    /// index rebuild.
    #[error("no data in the building database for PLZ {0}")]
    NoDataForPlz(String),

    /// A configuration value is outside its supported range.
    #[error("{what} must be within {min}..={max}, got {value}")]
    OutsideRange {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    /// An input file uses a coordinate reference system the projection table
    /// does not cover.
    #[error("unsupported coordinate reference system: EPSG:{0}")]
    UnsupportedCrs(u32),
}
