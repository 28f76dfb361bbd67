//! Column rewriting for generated CSV files.

use std::path::Path;

use rand::seq::SliceRandom;
use tracing::info;

use super::AtomicCsvWriter;
use crate::error::AppError;

/// Sets `column` of every data row in `path` to a random entry of `ids`.
///
/// The header match is case-insensitive; a missing column is appended. The
/// file is rewritten atomically. An empty column name or empty id list leaves
/// the file untouched. Returns the number of rows rewritten.
pub fn update_column(path: &Path, column: &str, ids: &[String]) -> Result<usize, AppError> {
    if column.is_empty() || ids.is_empty() {
        return Ok(0);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| AppError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut header: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    let index = match header.iter().position(|h| h.eq_ignore_ascii_case(column)) {
        Some(index) => index,
        None => {
            header.push(column.to_string());
            header.len() - 1
        }
    };

    let mut writer = AtomicCsvWriter::new(path)?;
    writer.write_record(&header)?;

    let mut rng = rand::thread_rng();
    let mut rows = 0usize;
    for record in reader.records() {
        let mut row: Vec<String> = record?.iter().map(String::from).collect();
        if row.len() <= index {
            row.resize(index + 1, String::new());
        }
        if let Some(id) = ids.choose(&mut rng) {
            row[index] = id.clone();
        }
        writer.write_record(&row)?;
        rows += 1;
    }

    writer.finish()?;
    info!("[GEN] Filled {} with ids for {} rows", column, rows);
    Ok(rows)
}
