use crate::schema::{PeriodBatch, TimeSeries, TimeSeriesPoint};
use chrono::NaiveDate;
use log::debug;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub series: TimeSeries,
    /// Rows of the concatenated input that were superseded by a later row
    /// for the same month.
    pub removed_duplicates: usize,
}

/// Merges a stored series with an incoming batch.
///
/// Existing points come first, incoming points after; for every month the
/// last point in that order wins. The result is sorted by period.
pub fn merge(existing: Option<&TimeSeries>, incoming: &PeriodBatch) -> MergeOutcome {
    let existing_points: &[TimeSeriesPoint] = existing.map(|s| s.points()).unwrap_or(&[]);
    let concatenated = existing_points.len() + incoming.len();

    let mut by_month: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for point in existing_points.iter().chain(incoming.points.iter()) {
        by_month.insert(point.period, point.value);
    }

    let points: Vec<TimeSeriesPoint> = by_month
        .into_iter()
        .map(|(period, value)| TimeSeriesPoint::new(period, value))
        .collect();
    let removed_duplicates = concatenated - points.len();

    debug!(
        "Merged {} existing and {} incoming rows into {} ({} duplicates removed)",
        existing_points.len(),
        incoming.len(),
        points.len(),
        removed_duplicates
    );

    MergeOutcome {
        series: TimeSeries::from_sorted_unique(points),
        removed_duplicates,
    }
}

pub fn merge_series(existing: &TimeSeries, incoming: &TimeSeries) -> MergeOutcome {
    merge(Some(existing), &PeriodBatch::from(incoming))
}
