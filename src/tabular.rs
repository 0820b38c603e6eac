//! Header-keyed CSV input shared by the roster and batch files.
//!
//! Cells are trimmed and rows may be shorter than the header. Blank cells
//! deserialize as `None`, so every row type keeps its fields optional and
//! applies its own defaults.

use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

fn reader_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::All).flexible(true);
    builder
}

/// Read every record of a CSV file.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(Error::NotFound(path.display().to_string()));
    }

    let reader = reader_builder().from_path(path)?;
    collect_records(reader)
}

/// Read every record from an in-memory or streamed source.
pub fn parse_records<T: DeserializeOwned, R: Read>(source: R) -> Result<Vec<T>> {
    collect_records(reader_builder().from_reader(source))
}

fn collect_records<T: DeserializeOwned, R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<T>> {
    // A bad header is fatal; a bad record only costs that record.
    reader.headers()?;

    let mut records = Vec::new();
    for result in reader.deserialize() {
        match result {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!("Skipping unreadable CSV record: {}", e),
        }
    }

    Ok(records)
}

/// Cell value with blanks treated as missing.
pub fn cell(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
