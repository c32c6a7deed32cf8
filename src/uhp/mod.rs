mod csv;
mod format;

pub use csv::{read_uhp_csv, write_uhp_csv};
pub use format::{
    UHP_COLUMNS, UHP_REQUIRED_COLUMNS, compute_uhp_input_for_plz, map_construction_to_tabular,
    map_refurbishment_levels, map_size_classes, map_tabular_year_classes, map_use_types,
    prepare_uhp_buildings,
};
