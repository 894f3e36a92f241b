//! Combined downloads offered when a run completes.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::persist::Table;
use crate::types::{Record, RunOutput};
use crate::Result;

pub const JSON_EXPORT_NAME: &str = "scraped_data.json";
pub const CSV_EXPORT_NAME: &str = "scraped_data.csv";

/// Pretty JSON array with one entry per successful URL.
pub fn combined_json(output: &RunOutput) -> Result<String> {
    let entries: Vec<Value> = output
        .results
        .iter()
        .map(|r| r.extraction.data.to_value())
        .collect();
    Ok(serde_json::to_string_pretty(&entries)?)
}

/// Every record from every URL, in run order.
pub fn combined_records(output: &RunOutput) -> Vec<Record> {
    output
        .results
        .iter()
        .flat_map(|r| r.extraction.data.records())
        .collect()
}

/// All records flattened into one CSV table with a header row.
pub fn combined_csv(output: &RunOutput) -> Result<String> {
    let table = Table::from_records(&combined_records(output))?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    if !table.columns.is_empty() {
        writer.write_record(&table.columns)?;
    }
    for row in &table.rows {
        writer.write_record(row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Writes both combined exports into `dir` and returns their paths.
pub fn write_exports(output: &RunOutput, dir: &Path) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir)?;

    let json_path = dir.join(JSON_EXPORT_NAME);
    fs::write(&json_path, combined_json(output)?)?;

    let csv_path = dir.join(CSV_EXPORT_NAME);
    fs::write(&csv_path, combined_csv(output)?)?;

    info!(
        "Combined exports written to {} and {}",
        json_path.display(),
        csv_path.display()
    );
    Ok((json_path, csv_path))
}
