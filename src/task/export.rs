//! Result files written by proxy-export tasks.
//!
//! The JSON dump is always written; `xlsx` adds a one-sheet workbook built
//! from the result's `data` array (or the result itself when it is an array).

use rust_xlsxwriter::{Workbook, XlsxError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::core::error::{GatewayError, GatewayResult};
use crate::transform::path::scalar_to_string;

/// Export file format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    /// Parse the `output` query parameter; anything unrecognised means JSON
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("xlsx") => ExportFormat::Xlsx,
            _ => ExportFormat::Json,
        }
    }
}

/// Timestamped base name for an export, e.g. `20261016T093000`
pub fn export_name() -> String {
    chrono::Local::now().format("%Y%m%dT%H%M%S").to_string()
}

/// Write `result` into `dir` as `<name>.json`, plus `<name>.xlsx` when asked
pub fn write_export(dir: &Path, name: &str, result: &Value, format: ExportFormat) -> GatewayResult<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(format!("{}.json", name)), serde_json::to_vec_pretty(result)?)?;
    if format == ExportFormat::Xlsx {
        write_xlsx(&dir.join(format!("{}.xlsx", name)), result)?;
    }
    Ok(())
}

/// Rows of a result: its `data` array, or the result itself when it is an array
fn rows(result: &Value) -> &[Value] {
    match result {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => items,
            _ => &[],
        },
        _ => &[],
    }
}

/// Column headers: union of object keys in first-seen order
fn headers(rows: &[Value]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut headers: Vec<String> = Vec::new();
    for row in rows {
        if let Value::Object(map) = row {
            for key in map.keys() {
                if seen.insert(key.as_str()) {
                    headers.push(key.clone());
                }
            }
        }
    }
    headers
}

/// Worksheet limits of the xlsx format
const MAX_XLSX_ROWS: u32 = 1_048_576;
const MAX_XLSX_COLUMNS: u16 = 16_384;

/// Last row and column index for `rows` data rows under a header row,
/// or an error when the sheet would exceed the xlsx limits
fn sheet_bounds(rows: usize, columns: usize) -> GatewayResult<(u32, u16)> {
    let last_row = u32::try_from(rows).ok().filter(|r| *r < MAX_XLSX_ROWS);
    let last_col = u16::try_from(columns)
        .ok()
        .filter(|c| *c <= MAX_XLSX_COLUMNS)
        .map(|c| c.saturating_sub(1));
    match (last_row, last_col) {
        (Some(row), Some(col)) => Ok((row, col)),
        _ => Err(GatewayError::validation(
            "output",
            format!(
                "export of {} rows x {} columns exceeds the xlsx limit of {} rows x {} columns",
                rows,
                columns,
                MAX_XLSX_ROWS - 1,
                MAX_XLSX_COLUMNS
            ),
        )),
    }
}

fn write_xlsx(path: &Path, result: &Value) -> GatewayResult<()> {
    let rows = rows(result);
    let headers = headers(rows);
    sheet_bounds(rows.len(), headers.len())?;
    let empty = Map::new();

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Sheet1").map_err(xlsx_error)?;

    for (col, header) in (0u16..).zip(headers.iter()) {
        sheet.write_string(0, col, header).map_err(xlsx_error)?;
    }

    for (line, row) in (1u32..).zip(rows.iter()) {
        let map = row.as_object().unwrap_or(&empty);
        for (col, header) in (0u16..).zip(headers.iter()) {
            match map.get(header) {
                None | Some(Value::Null) => {}
                Some(Value::Number(n)) => match n.as_f64() {
                    Some(f) => {
                        sheet.write_number(line, col, f).map_err(xlsx_error)?;
                    }
                    None => {
                        sheet.write_string(line, col, n.to_string()).map_err(xlsx_error)?;
                    }
                },
                Some(Value::Bool(b)) => {
                    sheet.write_boolean(line, col, *b).map_err(xlsx_error)?;
                }
                Some(other) => {
                    sheet
                        .write_string(line, col, scalar_to_string(other))
                        .map_err(xlsx_error)?;
                }
            }
        }
    }

    workbook.save(path).map_err(xlsx_error)?;
    Ok(())
}

fn xlsx_error(err: XlsxError) -> GatewayError {
    GatewayError::internal(format!("xlsx: {}", err))
}
