pub mod classify;
mod enrich;
mod table;

pub use classify::{BuildingUse, RefComponent};
pub use enrich::{CANONICAL_COLUMNS, enrich};
pub use table::BuildingTable;
