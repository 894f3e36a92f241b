use chrono::Local;
use rust_xlsxwriter::Workbook;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};
use url::Url;

use crate::types::Record;
use crate::{Result, ScraperError};

/// A flat table of text cells derived from extracted records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Lays records out as rows. Columns are the union of keys in first-seen order and
    /// missing keys become empty cells. Nested arrays or objects cannot be flattened.
    pub fn from_records(records: &[Record]) -> Result<Self> {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| cell_text(column, record.get(column)))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { columns, rows })
    }

    /// Rows derived from any JSON shape: a single-key mapping contributes that key's
    /// value, a list is used directly, and anything else becomes one row.
    pub fn from_value(value: &Value) -> Result<Self> {
        let rows_value = match value {
            Value::Object(map) if map.len() == 1 => map.values().next().unwrap_or(value),
            _ => value,
        };

        let records = match rows_value {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map.clone()),
                    other => Err(ScraperError::TabularConversion(format!(
                        "row is not a mapping: {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            Value::Object(map) => vec![map.clone()],
            other => {
                return Err(ScraperError::TabularConversion(format!(
                    "cannot lay out {} as rows",
                    other
                )))
            }
        };

        Self::from_records(&records)
    }
}

fn cell_text(column: &str, value: Option<&Value>) -> Result<String> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(nested) => Err(ScraperError::TabularConversion(format!(
            "column '{}' holds nested data: {}",
            column, nested
        ))),
    }
}

/// Writes normalized text to `folder/<name>_<YYYYMMDD-HHMMSS>.md`, creating the folder.
#[instrument(skip(raw_data, folder), fields(bytes = raw_data.len()))]
pub fn save_raw(raw_data: &str, folder: &Path, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(folder)?;
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let path = folder.join(format!("{}_{}.md", name, timestamp));
    fs::write(&path, raw_data)?;
    info!("Raw data saved to {}", path.display());
    Ok(path)
}

/// Something `save_formatted` accepts: either JSON text or an already parsed value.
pub enum Formatted<'a> {
    Text(&'a str),
    Value(&'a Value),
}

/// What `save_formatted` produced.
#[derive(Debug, Clone)]
pub struct SavedFormatted {
    pub json_path: PathBuf,
    /// Present only when the records could be flattened and the workbook written.
    pub xlsx_path: Option<PathBuf>,
    pub table: Option<Table>,
}

/// Writes the payload as pretty JSON, then tries to flatten it into a spreadsheet.
///
/// Text that is not JSON is an error and nothing is written. A failed flattening or
/// spreadsheet write is logged and leaves only the JSON file behind.
#[instrument(skip(data, folder))]
pub fn save_formatted(
    data: Formatted<'_>,
    folder: &Path,
    json_name: &str,
    xlsx_name: &str,
) -> Result<SavedFormatted> {
    let parsed;
    let value = match data {
        Formatted::Text(text) => {
            parsed = serde_json::from_str::<Value>(text)?;
            &parsed
        }
        Formatted::Value(value) => value,
    };

    fs::create_dir_all(folder)?;
    let json_path = folder.join(json_name);
    fs::write(&json_path, serde_json::to_string_pretty(value)?)?;
    info!("Formatted data saved to JSON at {}", json_path.display());

    let table = match Table::from_value(value) {
        Ok(table) => table,
        Err(e) => {
            warn!("Error creating table for spreadsheet: {}", e);
            return Ok(SavedFormatted {
                json_path,
                xlsx_path: None,
                table: None,
            });
        }
    };

    let xlsx_path = folder.join(xlsx_name);
    match write_xlsx(&table, &xlsx_path) {
        Ok(()) => {
            info!("Formatted data saved to Excel at {}", xlsx_path.display());
            Ok(SavedFormatted {
                json_path,
                xlsx_path: Some(xlsx_path),
                table: Some(table),
            })
        }
        Err(e) => {
            warn!("Error saving spreadsheet: {}", e);
            Ok(SavedFormatted {
                json_path,
                xlsx_path: None,
                table: Some(table),
            })
        }
    }
}

/// Header row, then one row per record, every cell as text.
pub fn write_xlsx(table: &Table, path: &Path) -> Result<()> {
    let xlsx_err = |e: rust_xlsxwriter::XlsxError| ScraperError::SpreadsheetError(e.to_string());

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, name) in table.columns.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, name.as_str())
            .map_err(xlsx_err)?;
    }
    for (row, cells) in table.rows.iter().enumerate() {
        for (col, cell) in cells.iter().enumerate() {
            worksheet
                .write_string(row as u32 + 1, col as u16, cell.as_str())
                .map_err(xlsx_err)?;
        }
    }

    workbook.save(path).map_err(xlsx_err)
}

/// `<host>_<YYYY_MM_DD__HH_MM_SS>`, with runs of non-word characters in the host
/// replaced by `_`.
pub fn run_folder_name(first_url: &str) -> Result<String> {
    let url = Url::parse(first_url)
        .map_err(|e| ScraperError::InvalidInput(format!("invalid URL {}: {}", first_url, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| ScraperError::InvalidInput(format!("URL has no host: {}", first_url)))?;
    let authority = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let timestamp = Local::now().format("%Y_%m_%d__%H_%M_%S");
    Ok(format!("{}_{}", sanitize(&authority), timestamp))
}

fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if c.is_alphanumeric() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// Creates a fresh run folder under `root`. An existing folder is never reused: a
/// numeric suffix is added until the name is free.
///
/// When the first URL has no usable host the folder is named `run_<timestamp>`; that
/// URL then fails on its own when it is fetched.
pub fn create_run_folder(root: &Path, first_url: &str) -> Result<PathBuf> {
    fs::create_dir_all(root)?;
    let base = run_folder_name(first_url).unwrap_or_else(|e| {
        warn!("{}; naming the run folder by time only", e);
        format!("run_{}", Local::now().format("%Y_%m_%d__%H_%M_%S"))
    });

    let mut attempt = 1;
    loop {
        let name = if attempt == 1 {
            base.clone()
        } else {
            format!("{}_{}", base, attempt)
        };
        let path = root.join(name);
        match fs::create_dir(&path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
