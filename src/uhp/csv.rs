//! The simulator's `;`-separated CSV interchange files.
//!
//! The layout is a header row, an optional second row with per-column
//! information such as units, then the data rows:
//!
//! ```text
//! column1;column2;column3;...
//! unit1;unit2;unit3;...
//! value1;value2;value3;...
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result, ensure};
use polars::prelude::*;

use crate::common;

/// Write `values` with an explicit header row and optional units row.
///
/// Columns are written in `header` order, which must cover every listed
/// column of the frame; extra frame columns are not written.
pub fn write_uhp_csv(
    path: &Path,
    values: &DataFrame,
    header: &[&str],
    units: &[&str],
) -> Result<()> {
    ensure!(
        units.is_empty() || units.len() == header.len(),
        "units row must have one entry per column: {} units vs {} columns",
        units.len(),
        header.len()
    );
    if let Some(parent) = path.parent() {
        common::ensure_dir_exists(parent)?;
    }

    let mut body = values
        .select(header.iter().copied())
        .context("simulator CSV columns missing from the data")?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create CSV file: {}", path.display()))?;
    writeln!(file, "{}", header.join(";"))?;
    if !units.is_empty() {
        writeln!(file, "{}", units.join(";"))?;
    }
    CsvWriter::new(&mut file)
        .include_header(false)
        .with_separator(b';')
        .finish(&mut body)?;
    Ok(())
}

/// Read a simulator CSV; returns the data and the units row when the file
/// carries one.
pub fn read_uhp_csv(path: &Path, has_units_row: bool) -> Result<(DataFrame, Vec<String>)> {
    let units = if has_units_row {
        let reader = BufReader::new(
            File::open(path)
                .with_context(|| format!("failed to open CSV file: {}", path.display()))?,
        );
        let mut lines = reader.lines();
        let _header = lines.next().transpose()?;
        lines
            .next()
            .transpose()?
            .map(|line| line.split(';').map(str::to_string).collect())
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let file = File::open(path)
        .with_context(|| format!("failed to open CSV file: {}", path.display()))?;
    let data = CsvReadOptions::default()
        .with_has_header(true)
        .with_skip_rows_after_header(usize::from(has_units_row))
        .map_parse_options(|parse| parse.with_separator(b';'))
        .into_reader_with_file_handle(file)
        .finish()
        .with_context(|| format!("failed to parse CSV file: {}", path.display()))?;
    Ok((data, units))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn frame() -> DataFrame {
        DataFrame::new(vec![
            Column::new("bid".into(), &[0i64, 1, 2]),
            Column::new("area".into(), &[120.5, 80.0, 300.25]),
            Column::new("free_walls".into(), &[4i64, 2, 3]),
        ])
        .unwrap()
    }

    #[test]
    fn round_trip_without_units() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("buildings.csv");
        write_uhp_csv(&path, &frame(), &["bid", "area", "free_walls"], &[]).unwrap();

        let (read, units) = read_uhp_csv(&path, false).unwrap();
        assert!(units.is_empty());
        assert!(read.equals(&frame()));
    }

    #[test]
    fn round_trip_with_units() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("buildings.csv");
        write_uhp_csv(
            &path,
            &frame(),
            &["bid", "area", "free_walls"],
            &["-", "m2", "-"],
        )
        .unwrap();

        let (read, units) = read_uhp_csv(&path, true).unwrap();
        assert_eq!(units, vec!["-", "m2", "-"]);
        assert_eq!(read.height(), 3);
        assert_eq!(
            read.column("area").unwrap().f64().unwrap().get(2),
            Some(300.25)
        );
    }

    #[test]
    fn header_order_controls_the_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ordered.csv");
        write_uhp_csv(&path, &frame(), &["area", "bid"], &[]).unwrap();

        let (read, _) = read_uhp_csv(&path, false).unwrap();
        assert_eq!(
            read.get_column_names()
                .iter()
                .map(|n| n.as_str())
                .collect::<Vec<_>>(),
            vec!["area", "bid"]
        );
    }

    #[test]
    fn mismatched_units_row_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        assert!(write_uhp_csv(&path, &frame(), &["bid", "area"], &["-"]).is_err());
    }
}
