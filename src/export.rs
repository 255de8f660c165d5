//! Flatten record files into one CSV sheet.

use crate::error::{HarvestError, Result};
use crate::models::{value_text, Record};
use crate::store::load_records;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const BASE_COLUMNS: [&str; 6] = ["title", "price", "address", "details", "builder", "link"];

/// Read every input file, skipping ones that are missing or not valid JSON
pub fn collect_records(inputs: &[PathBuf]) -> Vec<Record> {
    let mut records = Vec::new();
    for path in inputs {
        match load_records(path) {
            Ok(mut loaded) => records.append(&mut loaded),
            Err(HarvestError::Io { path, source }) => {
                warn!("File not found or unreadable: {} ({})", path.display(), source)
            }
            Err(e) => warn!("Invalid JSON in file {}: {}", path.display(), e),
        }
    }
    records
}

fn promotions(record: &Record) -> &[Value] {
    match record.get("promotions") {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

pub fn max_promotions(records: &[Record]) -> usize {
    records.iter().map(|r| promotions(r).len()).max().unwrap_or(0)
}

/// Fixed columns followed by `promo_title{N}`, `promo_content{N}` pairs
pub fn csv_header(max_promotions: usize) -> Vec<String> {
    let mut header: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    for n in 1..=max_promotions {
        header.push(format!("promo_title{}", n));
        header.push(format!("promo_content{}", n));
    }
    header
}

fn row(record: &Record, max_promotions: usize) -> Vec<String> {
    let mut row: Vec<String> = BASE_COLUMNS
        .iter()
        .map(|field| record.get(field).map(value_text).unwrap_or_default())
        .collect();

    let promos = promotions(record);
    for i in 0..max_promotions {
        let promo = promos.get(i);
        for key in ["promo_title", "promo_content"] {
            row.push(
                promo
                    .and_then(|p| p.get(key))
                    .map(value_text)
                    .unwrap_or_default(),
            );
        }
    }
    row
}

/// Write records as CSV; returns the number of columns
pub fn write_csv<W: Write>(records: &[Record], writer: W) -> Result<usize> {
    let max = max_promotions(records);
    let header = csv_header(max);

    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(&header)?;
    for record in records {
        csv_writer.write_record(row(record, max))?;
    }
    csv_writer.flush().map_err(|e| HarvestError::io("<csv output>", e))?;

    Ok(header.len())
}

/// Merge the input files into `output`. Returns `None` when there was no data.
pub fn export_csv(inputs: &[PathBuf], output: &Path) -> Result<Option<usize>> {
    let records = collect_records(inputs);
    if records.is_empty() {
        warn!("No valid JSON data found");
        return Ok(None);
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
    }
    let file = std::fs::File::create(output).map_err(|e| HarvestError::io(output, e))?;
    let columns = write_csv(&records, file)?;

    info!(
        "Wrote {} rows with {} columns to {}",
        records.len(),
        columns,
        output.display()
    );
    Ok(Some(columns))
}
