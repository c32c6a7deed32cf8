use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;

/// Create the directory (and parents) if it does not exist yet.
pub(crate) fn ensure_dir_exists(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            bail!("path exists but is not a directory: {}", path.display());
        }
        return Ok(());
    }
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

/// Error unless the directory already exists.
pub(crate) fn require_dir_exists(path: &Path) -> Result<()> {
    if !path.is_dir() {
        bail!("directory not found: {}", path.display());
    }
    Ok(())
}

/// Mirror `input` below `output_base`, inserting `_mod` before the extension.
///
/// `input` must live below `input_root`; the relative directory structure is
/// preserved so enriched partitions never collide across municipalities.
pub(crate) fn derive_mod_output_path(
    output_base: &Path,
    input_root: &Path,
    input: &Path,
) -> Result<PathBuf> {
    let rel = input.strip_prefix(input_root).with_context(|| {
        format!(
            "partition {} is not below {}",
            input.display(),
            input_root.display()
        )
    })?;
    let stem = rel
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("partition filename is not valid UTF-8: {}", rel.display()))?;
    let ext = rel.extension().and_then(|s| s.to_str()).unwrap_or("shp");
    let mut out = output_base.join(rel);
    out.set_file_name(format!("{stem}_mod.{ext}"));
    Ok(out)
}

static NON_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9]").expect("static pattern"));

/// Municipality id of a partition file: all digits of its file stem.
pub(crate) fn municipality_id(path: &Path) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("partition filename is not valid UTF-8: {}", path.display()))?;
    Ok(NON_DIGITS.replace_all(stem, "").into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mod_output_path_mirrors_the_tree() {
        let out = derive_mod_output_path(
            Path::new("/data/bbd"),
            Path::new("/BBD"),
            Path::new("/BBD/TestBezirk/Gemeinde_09162000.shp"),
        )
        .unwrap();
        assert_eq!(
            out,
            PathBuf::from("/data/bbd/TestBezirk/Gemeinde_09162000_mod.shp")
        );
    }

    #[test]
    fn mod_output_path_rejects_files_outside_the_root() {
        assert!(
            derive_mod_output_path(
                Path::new("/data/bbd"),
                Path::new("/BBD"),
                Path::new("/elsewhere/a.shp"),
            )
            .is_err()
        );
    }

    #[test]
    fn municipality_id_strips_non_digits() {
        let id = municipality_id(Path::new("/BBD/X/Gemeinde_09162000.shp")).unwrap();
        assert_eq!(id, "09162000");
        assert_eq!(municipality_id(Path::new("no_digits.shp")).unwrap(), "");
    }
}
