mod fs;
pub(crate) mod shp;

pub(crate) use fs::{derive_mod_output_path, ensure_dir_exists, municipality_id, require_dir_exists};
