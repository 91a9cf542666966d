//! Reading uploaded tables into an untyped [`RawTable`].
//!
//! Uploads arrive as CSV (always available) or XLSX (behind the `xlsx`
//! feature). No typing happens here beyond what the file format itself
//! carries; dates and amounts are interpreted by the normalizer.

use crate::error::{Result, RevfluxError};
use chrono::NaiveDateTime;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Empty,
    Text(String),
    Number(f64),
    /// Spreadsheet cells that the file format already marks as dates.
    DateTime(NaiveDateTime),
}

impl RawValue {
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            RawValue::Empty
        } else {
            RawValue::Text(value)
        }
    }

    /// Textual form used when re-parsing a cell against explicit date formats.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RawValue::Empty => None,
            RawValue::Text(s) => Some(s.trim().to_string()),
            RawValue::Number(n) => Some(n.to_string()),
            RawValue::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::text(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RawValue>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a two-column table, handy for in-memory uploads.
    pub fn from_pairs<D, V>(date_column: &str, value_column: &str, rows: Vec<(D, V)>) -> Self
    where
        D: Into<RawValue>,
        V: Into<RawValue>,
    {
        let mut table = Self::new(vec![date_column.to_string(), value_column.to_string()]);
        for (date, value) in rows {
            table.rows.push(vec![date.into(), value.into()]);
        }
        table
    }

    pub fn push_row(&mut self, row: Vec<RawValue>) {
        self.rows.push(row);
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.trim() == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at (row, column); short rows read as empty.
    pub fn cell(&self, row: usize, column: usize) -> &RawValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&RawValue::Empty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Csv,
    Xlsx,
}

impl UploadFormat {
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();

        match extension.as_str() {
            "csv" => Some(UploadFormat::Csv),
            "xlsx" => Some(UploadFormat::Xlsx),
            _ => None,
        }
    }
}

pub fn read_csv<R: Read>(reader: R) -> Result<RawTable> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let columns = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut table = RawTable::new(columns);
    for record in csv_reader.records() {
        let record = record?;
        table.push_row(record.iter().map(RawValue::text).collect());
    }

    Ok(table)
}

pub fn read_csv_path(path: impl AsRef<Path>) -> Result<RawTable> {
    let file = std::fs::File::open(path)?;
    read_csv(file)
}

/// Reads an uploaded file's bytes, choosing the parser from its extension.
pub fn read_upload(file_name: &str, bytes: &[u8]) -> Result<RawTable> {
    match UploadFormat::from_file_name(file_name) {
        Some(UploadFormat::Csv) => read_csv(bytes),
        Some(UploadFormat::Xlsx) => read_xlsx_bytes(bytes),
        None => Err(RevfluxError::InvalidConfig(format!(
            "Unsupported upload '{}': expected a .csv or .xlsx file",
            file_name
        ))),
    }
}

#[cfg(feature = "xlsx")]
fn read_xlsx_bytes(bytes: &[u8]) -> Result<RawTable> {
    use calamine::{Reader, Xlsx};
    use std::io::Cursor;

    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| RevfluxError::Spreadsheet(format!("Could not open workbook: {}", e)))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| RevfluxError::Spreadsheet("Workbook has no sheets".to_string()))?;

    let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
        RevfluxError::Spreadsheet(format!("Could not read sheet '{}': {}", sheet_name, e))
    })?;

    let mut rows = range.rows();
    let columns = match rows.next() {
        Some(header) => header.iter().map(|cell| cell.to_string()).collect(),
        None => Vec::new(),
    };

    let mut table = RawTable::new(columns);
    for row in rows {
        table.push_row(row.iter().map(raw_from_cell).collect());
    }

    Ok(table)
}

#[cfg(feature = "xlsx")]
fn raw_from_cell(cell: &calamine::DataType) -> RawValue {
    use calamine::DataType;

    match *cell {
        DataType::Empty => RawValue::Empty,
        DataType::String(ref s) | DataType::DateTimeIso(ref s) => RawValue::text(s.as_str()),
        DataType::Float(f) => RawValue::Number(f),
        DataType::Int(i) => RawValue::Number(i as f64),
        DataType::Bool(b) => RawValue::text(b.to_string()),
        DataType::DateTime(serial) => excel_serial_to_datetime(serial)
            .map(RawValue::DateTime)
            .unwrap_or(RawValue::Empty),
        ref other => RawValue::text(other.to_string()),
    }
}

#[cfg(not(feature = "xlsx"))]
fn read_xlsx_bytes(_bytes: &[u8]) -> Result<RawTable> {
    Err(RevfluxError::InvalidConfig(
        "XLSX uploads require the `xlsx` feature".to_string(),
    ))
}

/// Converts an Excel serial day number (1900 date system) to a timestamp.
#[cfg(feature = "xlsx")]
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    let epoch = chrono::NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round() as i64;
    epoch.checked_add_signed(chrono::Duration::seconds(seconds))
}
