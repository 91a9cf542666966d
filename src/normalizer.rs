//! Period normalization: turns the date and revenue columns of an upload
//! into month-start points sorted by period.

use crate::error::{Result, RevfluxError};
use crate::ingestion::{RawTable, RawValue};
use crate::schema::{DropPolicy, PeriodBatch, RevfluxConfig, TimeSeriesPoint};
use crate::utils::first_of_month;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, warn};

const GENERIC_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

const GENERIC_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%Y.%m.%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

/// Explicit formats tried, in this order, when the generic parse leaves gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `%d/%m/%Y`
    DayMonthYearSlash,
    /// `%Y/%m/%d`
    YearMonthDaySlash,
    /// `%Y-%m`
    YearMonth,
    /// `%Y-%m-%d`
    YearMonthDay,
    /// `%d-%m-%Y`
    DayMonthYearDash,
}

impl DateFormat {
    pub const FALLBACK_ORDER: [DateFormat; 5] = [
        DateFormat::DayMonthYearSlash,
        DateFormat::YearMonthDaySlash,
        DateFormat::YearMonth,
        DateFormat::YearMonthDay,
        DateFormat::DayMonthYearDash,
    ];

    pub fn pattern(&self) -> &'static str {
        match self {
            DateFormat::DayMonthYearSlash => "%d/%m/%Y",
            DateFormat::YearMonthDaySlash => "%Y/%m/%d",
            DateFormat::YearMonth => "%Y-%m",
            DateFormat::YearMonthDay => "%Y-%m-%d",
            DateFormat::DayMonthYearDash => "%d-%m-%Y",
        }
    }

    pub fn parse(&self, text: &str) -> Option<NaiveDate> {
        let text = text.trim();
        match self {
            // chrono cannot build a date without a day, so pin it to the 1st.
            DateFormat::YearMonth => {
                NaiveDate::parse_from_str(&format!("{}-01", text), "%Y-%m-%d").ok()
            }
            _ => NaiveDate::parse_from_str(text, self.pattern()).ok(),
        }
    }
}

/// Lenient single-cell parse covering ISO dates, timestamps and month names.
pub fn parse_generic(value: &RawValue) -> Option<NaiveDate> {
    match value {
        RawValue::DateTime(dt) => Some(dt.date()),
        RawValue::Text(text) => parse_generic_text(text.trim()),
        RawValue::Empty | RawValue::Number(_) => None,
    }
}

fn parse_generic_text(text: &str) -> Option<NaiveDate> {
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }

    for fmt in GENERIC_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.date());
        }
    }

    for fmt in GENERIC_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return Some(date);
        }
    }

    // "January 2025" / "Jan 2025"
    let with_day = format!("1 {}", text);
    ["%d %B %Y", "%d %b %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&with_day, fmt).ok())
}

pub fn parse_amount(value: &RawValue) -> Option<f64> {
    let parsed = match value {
        RawValue::Number(n) => Some(*n),
        RawValue::Text(text) => text.trim().parse::<f64>().ok(),
        RawValue::Empty | RawValue::DateTime(_) => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub period: NaiveDate,
    pub value: Option<f64>,
    /// Zero-based index of the row in the uploaded table.
    pub source_row: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    pub input_rows: usize,
    pub unparsable_dates: usize,
    pub invalid_values: usize,
    /// Explicit formats that filled at least one row.
    pub fallback_formats: Vec<DateFormat>,
    /// Indices of dropped rows; only collected under [`DropPolicy::Report`].
    pub dropped_rows: Vec<usize>,
}

impl NormalizeReport {
    pub fn dropped(&self) -> usize {
        self.unparsable_dates + self.invalid_values
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub rows: Vec<NormalizedRow>,
    pub report: NormalizeReport,
    value_column: String,
    has_values: bool,
}

impl Normalized {
    pub fn has_values(&self) -> bool {
        self.has_values
    }

    pub fn periods(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|r| r.period).collect()
    }

    /// Converts to revenue points; fails when the upload had no value column.
    pub fn into_batch(self) -> Result<PeriodBatch> {
        if !self.has_values {
            return Err(RevfluxError::MissingColumn(self.value_column));
        }

        let points = self
            .rows
            .into_iter()
            .filter_map(|row| row.value.map(|v| TimeSeriesPoint::new(row.period, v)))
            .collect();

        Ok(PeriodBatch { points })
    }
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    date_column: String,
    value_column: String,
    drop_policy: DropPolicy,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::from_config(&RevfluxConfig::default())
    }
}

impl Normalizer {
    pub fn new(date_column: impl Into<String>, value_column: impl Into<String>) -> Self {
        Self {
            date_column: date_column.into(),
            value_column: value_column.into(),
            drop_policy: DropPolicy::Silent,
        }
    }

    pub fn from_config(config: &RevfluxConfig) -> Self {
        Self::new(config.date_column.clone(), config.value_column.clone())
            .with_drop_policy(config.drop_policy)
    }

    pub fn with_drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    pub fn date_column(&self) -> &str {
        &self.date_column
    }

    pub fn value_column(&self) -> &str {
        &self.value_column
    }

    pub fn normalize(&self, table: &RawTable) -> Result<Normalized> {
        let date_idx = table
            .column_index(&self.date_column)
            .ok_or_else(|| RevfluxError::MissingColumn(self.date_column.clone()))?;
        let value_idx = table.column_index(&self.value_column);

        let mut report = NormalizeReport {
            input_rows: table.len(),
            ..Default::default()
        };

        let mut dates: Vec<Option<NaiveDate>> = (0..table.len())
            .map(|row| parse_generic(table.cell(row, date_idx)))
            .collect();

        if dates.iter().any(Option::is_none) {
            self.fill_with_fallback_formats(table, date_idx, &mut dates, &mut report);
        }

        let mut rows = Vec::with_capacity(table.len());
        for (row_idx, date) in dates.into_iter().enumerate() {
            let Some(date) = date else {
                report.unparsable_dates += 1;
                self.record_drop(&mut report, row_idx, "unparsable date");
                continue;
            };

            let value = match value_idx {
                Some(col) => match parse_amount(table.cell(row_idx, col)) {
                    Some(v) => Some(v),
                    None => {
                        report.invalid_values += 1;
                        self.record_drop(&mut report, row_idx, "non-numeric value");
                        continue;
                    }
                },
                None => None,
            };

            rows.push(NormalizedRow {
                period: first_of_month(date),
                value,
                source_row: row_idx,
            });
        }

        // Stable: same-month rows keep upload order, which last-write-wins relies on.
        rows.sort_by_key(|r| r.period);

        if report.dropped() > 0 {
            match self.drop_policy {
                DropPolicy::Silent => debug!(
                    "Dropped {} of {} rows during normalization",
                    report.dropped(),
                    report.input_rows
                ),
                DropPolicy::Report => warn!(
                    "Dropped {} of {} rows during normalization ({} unparsable dates, {} invalid values)",
                    report.dropped(),
                    report.input_rows,
                    report.unparsable_dates,
                    report.invalid_values
                ),
            }
        }

        Ok(Normalized {
            rows,
            report,
            value_column: self.value_column.clone(),
            has_values: value_idx.is_some(),
        })
    }

    /// Normalizes a training upload straight into a batch of revenue points.
    pub fn normalize_batch(&self, table: &RawTable) -> Result<PeriodBatch> {
        self.normalize(table)?.into_batch()
    }

    fn fill_with_fallback_formats(
        &self,
        table: &RawTable,
        date_idx: usize,
        dates: &mut [Option<NaiveDate>],
        report: &mut NormalizeReport,
    ) {
        for format in DateFormat::FALLBACK_ORDER {
            let mut filled = 0;
            for (row, slot) in dates.iter_mut().enumerate() {
                if slot.is_some() {
                    continue;
                }
                let parsed = table
                    .cell(row, date_idx)
                    .as_text()
                    .and_then(|text| format.parse(&text));
                if parsed.is_some() {
                    *slot = parsed;
                    filled += 1;
                }
            }

            if filled > 0 {
                debug!("Format {} filled {} rows", format.pattern(), filled);
                report.fallback_formats.push(format);
            }

            if dates.iter().all(Option::is_some) {
                break;
            }
        }
    }

    fn record_drop(&self, report: &mut NormalizeReport, row: usize, reason: &str) {
        if self.drop_policy == DropPolicy::Report {
            report.dropped_rows.push(row);
            debug!("Row {} dropped: {}", row, reason);
        }
    }
}

/// Renders points back into an upload-shaped table (`YYYY-MM-DD` dates).
pub fn points_to_table(points: &[TimeSeriesPoint], date_column: &str, value_column: &str) -> RawTable {
    let mut table = RawTable::new(vec![date_column.to_string(), value_column.to_string()]);
    for point in points {
        table.push_row(vec![
            RawValue::Text(point.period.format("%Y-%m-%d").to_string()),
            RawValue::Number(point.value),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn table(rows: Vec<(&str, &str)>) -> RawTable {
        RawTable::from_pairs("Periode", "Pemasukan", rows)
    }

    #[test]
    fn test_generic_formats() {
        let cases = [
            ("2025-01-15", date(2025, 1, 15)),
            ("2025-01-15 08:30:00", date(2025, 1, 15)),
            ("2025-01-15T08:30:00+07:00", date(2025, 1, 15)),
            ("2025/03/02", date(2025, 3, 2)),
            ("03/02/2025", date(2025, 3, 2)),
            ("March 2025", date(2025, 3, 1)),
            ("5 Mar 2025", date(2025, 3, 5)),
        ];
        for (text, expected) in cases {
            assert_eq!(
                parse_generic(&RawValue::text(text)),
                Some(expected),
                "failed on {}",
                text
            );
        }
        assert_eq!(parse_generic(&RawValue::text("15/01/2025")), None);
        assert_eq!(parse_generic(&RawValue::Number(45000.0)), None);
    }

    #[test]
    fn test_fallback_formats() {
        assert_eq!(
            DateFormat::DayMonthYearSlash.parse("15/01/2025"),
            Some(date(2025, 1, 15))
        );
        assert_eq!(DateFormat::YearMonth.parse("2025-07"), Some(date(2025, 7, 1)));
        assert_eq!(DateFormat::YearMonth.parse("2025-07-09"), None);
        assert_eq!(
            DateFormat::DayMonthYearDash.parse("31-12-2024"),
            Some(date(2024, 12, 31))
        );
    }

    #[test]
    fn test_normalize_floors_and_sorts() {
        let input = table(vec![
            ("2025-02-01", "14000000"),
            ("2025-01-15", "12000000"),
            ("2025-01-20", "13000000"),
        ]);
        let normalized = Normalizer::default().normalize(&input).unwrap();

        assert_eq!(
            normalized.periods(),
            vec![date(2025, 1, 1), date(2025, 1, 1), date(2025, 2, 1)]
        );
        let values: Vec<_> = normalized.rows.iter().map(|r| r.value.unwrap()).collect();
        assert_eq!(values, vec![12_000_000.0, 13_000_000.0, 14_000_000.0]);
    }

    #[test]
    fn test_mixed_formats_use_fallbacks() {
        let input = table(vec![
            ("2025-01-01", "1"),
            ("15/02/2025", "2"),
            ("2025-03", "3"),
            ("garbage", "4"),
        ]);
        let normalized = Normalizer::default().normalize(&input).unwrap();

        assert_eq!(
            normalized.periods(),
            vec![date(2025, 1, 1), date(2025, 2, 1), date(2025, 3, 1)]
        );
        assert_eq!(normalized.report.unparsable_dates, 1);
        assert_eq!(
            normalized.report.fallback_formats,
            vec![DateFormat::DayMonthYearSlash, DateFormat::YearMonth]
        );
    }

    #[test]
    fn test_fallback_stops_once_column_is_complete() {
        let input = table(vec![("2025-01-01", "1"), ("13/02/2025", "2")]);
        let normalized = Normalizer::default().normalize(&input).unwrap();
        assert_eq!(
            normalized.report.fallback_formats,
            vec![DateFormat::DayMonthYearSlash]
        );
    }

    #[test]
    fn test_non_numeric_values_dropped() {
        let input = table(vec![
            ("2025-01-01", "12000000"),
            ("2025-02-01", "Rp 13.000.000"),
            ("2025-03-01", ""),
            ("2025-04-01", "NaN"),
            ("2025-05-01", " 1.5e7 "),
        ]);
        let normalized = Normalizer::default().normalize(&input).unwrap();

        assert_eq!(normalized.rows.len(), 2);
        assert_eq!(normalized.report.invalid_values, 3);
        assert!(normalized.report.dropped_rows.is_empty());
        assert_eq!(normalized.rows[1].value, Some(15_000_000.0));
    }

    #[test]
    fn test_report_policy_collects_rows() {
        let input = table(vec![("nope", "1"), ("2025-02-01", "x"), ("2025-03-01", "3")]);
        let normalized = Normalizer::default()
            .with_drop_policy(DropPolicy::Report)
            .normalize(&input)
            .unwrap();

        assert_eq!(normalized.report.dropped_rows, vec![0, 1]);
        assert_eq!(normalized.report.dropped(), 2);
    }

    #[test]
    fn test_missing_date_column() {
        let input = RawTable::from_pairs("Tanggal", "Pemasukan", vec![("2025-01-01", "1")]);
        let err = Normalizer::default().normalize(&input).unwrap_err();
        assert!(matches!(err, RevfluxError::MissingColumn(ref c) if c == "Periode"));
        assert!(err.is_schema_error());
    }

    #[test]
    fn test_value_column_optional_until_batch() {
        let mut input = RawTable::new(vec!["Periode".to_string()]);
        input.push_row(vec![RawValue::text("2025-04-09")]);

        let normalized = Normalizer::default().normalize(&input).unwrap();
        assert!(!normalized.has_values());
        assert_eq!(normalized.periods(), vec![date(2025, 4, 1)]);

        let err = normalized.into_batch().unwrap_err();
        assert!(matches!(err, RevfluxError::MissingColumn(ref c) if c == "Pemasukan"));
    }

    #[test]
    fn test_normalize_is_idempotent_on_clean_series() {
        let input = table(vec![
            ("2024-12-01", "10"),
            ("2025-01-01", "20"),
            ("2025-03-01", "30"),
        ]);
        let normalizer = Normalizer::default();
        let once = normalizer.normalize_batch(&input).unwrap();
        let twice = normalizer
            .normalize_batch(&points_to_table(&once.points, "Periode", "Pemasukan"))
            .unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_spreadsheet_datetime_cells() {
        let mut input = RawTable::new(vec!["Periode".to_string(), "Pemasukan".to_string()]);
        input.push_row(vec![
            RawValue::DateTime(date(2025, 6, 17).and_hms_opt(0, 0, 0).unwrap()),
            RawValue::Number(5.0),
        ]);
        let batch = Normalizer::default().normalize_batch(&input).unwrap();
        assert_eq!(batch.points[0].period, date(2025, 6, 1));
    }
}
