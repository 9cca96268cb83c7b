//! Tab-delimited table files.
//!
//! Layout: one header row of column labels, then one row per sample. Labels
//! are kept verbatim as strings (a label such as `1` stays the string `"1"`).
//! Values are written with the shortest representation that parses back to
//! the same `f64`.

use std::path::Path;

use csv::{ReaderBuilder, Trim, WriterBuilder};
use tracing::debug;

use crate::domain::TacTable;
use crate::error::FitError;

/// Read a tab-delimited table.
pub fn read_table(path: &Path) -> Result<TacTable, FitError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(Trim::All)
        .from_path(path)
        .map_err(|e| FitError::Table(format!("failed to open '{}': {e}", path.display())))?;

    let labels: Vec<String> = reader
        .headers()
        .map_err(|e| FitError::Table(format!("failed to read header of '{}': {e}", path.display())))?
        .iter()
        .map(str::to_string)
        .collect();
    if labels.is_empty() || labels.iter().any(|l| l.is_empty()) {
        return Err(FitError::Table(format!(
            "'{}' has an empty column label",
            path.display()
        )));
    }
    if let Some(dup) = labels.iter().enumerate().find(|(i, l)| labels[..*i].contains(l)) {
        return Err(FitError::Table(format!(
            "'{}' has duplicate column label '{}'",
            path.display(),
            dup.1
        )));
    }

    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); labels.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| FitError::Table(format!("{}: {e}", path.display())))?;
        if record.len() != labels.len() {
            return Err(FitError::Table(format!(
                "{}: row {} has {} fields, expected {}",
                path.display(),
                row + 2,
                record.len(),
                labels.len()
            )));
        }
        for ((field, column), label) in record.iter().zip(columns.iter_mut()).zip(labels.iter()) {
            let value: f64 = field.parse().map_err(|_| {
                FitError::Table(format!(
                    "{}: row {}, column '{label}': '{field}' is not a number",
                    path.display(),
                    row + 2
                ))
            })?;
            column.push(value);
        }
    }

    let mut table = TacTable::new();
    for (label, values) in labels.into_iter().zip(columns) {
        table.insert(label, values)?;
    }
    debug!(path = %path.display(), columns = table.labels().len(), rows = table.len(), "read table");
    Ok(table)
}

/// Write a table as tab-delimited text.
pub fn write_table(path: &Path, table: &TacTable) -> Result<(), FitError> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(|e| FitError::Table(format!("failed to create '{}': {e}", path.display())))?;

    let write_err = |e: csv::Error| FitError::Table(format!("failed to write '{}': {e}", path.display()));

    writer.write_record(table.labels()).map_err(write_err)?;
    let columns: Vec<&[f64]> = table.iter().map(|(_, c)| c).collect();
    for row in 0..table.len() {
        writer
            .write_record(columns.iter().map(|c| c[row].to_string()))
            .map_err(write_err)?;
    }
    writer.flush()?;
    debug!(path = %path.display(), rows = table.len(), "wrote table");
    Ok(())
}
