use crate::error::{Result, RevfluxError};
use chrono::{Datelike, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_DATE_COLUMN: &str = "Periode";
pub const DEFAULT_VALUE_COLUMN: &str = "Pemasukan";

/// Dataset identifier, taken from the base name of the first uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(RevfluxError::InvalidConfig(
                "Dataset identifier must not be empty".to_string(),
            ));
        }
        if id.contains(['/', '\\']) {
            return Err(RevfluxError::InvalidConfig(format!(
                "Dataset identifier '{}' must not contain path separators",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Derives the identifier from an uploaded file name ("sales_2024.csv" -> "sales_2024").
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        Self::new(stem)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Always the first day of a month.
    pub period: NaiveDate,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(period: NaiveDate, value: f64) -> Self {
        Self { period, value }
    }

    pub fn month_key(&self) -> (i32, u32) {
        (self.period.year(), self.period.month())
    }
}

/// Normalizer output: ascending by period, but several points may share a month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodBatch {
    pub points: Vec<TimeSeriesPoint>,
}

impl PeriodBatch {
    pub fn new(mut points: Vec<TimeSeriesPoint>) -> Self {
        points.sort_by_key(|p| p.period);
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl From<&TimeSeries> for PeriodBatch {
    fn from(series: &TimeSeries) -> Self {
        Self {
            points: series.points.clone(),
        }
    }
}

/// Monthly series, strictly increasing by period. Gaps are allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TimeSeriesPoint>", into = "Vec<TimeSeriesPoint>")]
pub struct TimeSeries {
    points: Vec<TimeSeriesPoint>,
}

impl TimeSeries {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validating constructor: periods must be month starts, strictly increasing.
    pub fn from_points(points: Vec<TimeSeriesPoint>) -> Result<Self> {
        for point in &points {
            if point.period.day() != 1 {
                return Err(RevfluxError::InvalidSeries(format!(
                    "Period {} is not the first day of a month",
                    point.period
                )));
            }
        }

        for pair in points.windows(2) {
            if pair[1].period <= pair[0].period {
                return Err(RevfluxError::InvalidSeries(format!(
                    "Periods must be strictly increasing: {} follows {}",
                    pair[1].period, pair[0].period
                )));
            }
        }

        Ok(Self { points })
    }

    pub(crate) fn from_sorted_unique(points: Vec<TimeSeriesPoint>) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].period < w[1].period));
        Self { points }
    }

    pub fn points(&self) -> &[TimeSeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_period(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.period)
    }

    pub fn last_period(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.period)
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn periods(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.period).collect()
    }

    pub fn get(&self, period: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&period, |p| p.period)
            .ok()
            .map(|idx| self.points[idx].value)
    }

    /// The last `n` points (all of them when the series is shorter).
    pub fn tail(&self, n: usize) -> &[TimeSeriesPoint] {
        &self.points[self.points.len().saturating_sub(n)..]
    }
}

impl TryFrom<Vec<TimeSeriesPoint>> for TimeSeries {
    type Error = RevfluxError;

    fn try_from(points: Vec<TimeSeriesPoint>) -> Result<Self> {
        Self::from_points(points)
    }
}

impl From<TimeSeries> for Vec<TimeSeriesPoint> {
    fn from(series: TimeSeries) -> Self {
        series.points
    }
}

/// Serialized trained model. Opaque to everything but the adapter that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    pub bytes: Vec<u8>,
}

impl ModelArtifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub id: DatasetId,
    pub series: TimeSeries,
    pub model: Option<ModelArtifact>,
}

impl Dataset {
    pub fn new(id: DatasetId, series: TimeSeries) -> Self {
        Self {
            id,
            series,
            model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub periods: Vec<NaiveDate>,
    pub point_forecast: Vec<f64>,
    pub lower_bound: Vec<f64>,
    pub upper_bound: Vec<f64>,
    pub confidence_level: f64,
}

impl ForecastResult {
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn last_period(&self) -> Option<NaiveDate> {
        self.periods.last().copied()
    }

    /// Forecast rows as `(period, point, lower, upper)`.
    pub fn rows(&self) -> impl Iterator<Item = (NaiveDate, f64, f64, f64)> + '_ {
        self.periods
            .iter()
            .zip(&self.point_forecast)
            .zip(self.lower_bound.iter().zip(&self.upper_bound))
            .map(|((&period, &point), (&lower, &upper))| (period, point, lower, upper))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ArimaOrder {
    #[schemars(description = "Autoregressive order (p)")]
    pub p: usize,
    #[schemars(description = "Differencing order (d)")]
    pub d: usize,
    #[schemars(description = "Moving-average order (q)")]
    pub q: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct SeasonalOrder {
    #[schemars(description = "Seasonal autoregressive order (P)")]
    pub p: usize,
    #[schemars(description = "Seasonal differencing order (D)")]
    pub d: usize,
    #[schemars(description = "Seasonal moving-average order (Q)")]
    pub q: usize,
    #[schemars(description = "Season length in months (12 for yearly seasonality)")]
    pub period: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ModelSpec {
    pub order: ArimaOrder,
    pub seasonal_order: SeasonalOrder,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            order: ArimaOrder { p: 1, d: 1, q: 1 },
            seasonal_order: SeasonalOrder {
                p: 1,
                d: 1,
                q: 1,
                period: 12,
            },
        }
    }
}

impl ModelSpec {
    pub fn validate(&self) -> Result<()> {
        let seasonal = &self.seasonal_order;
        let has_seasonal_terms = seasonal.p + seasonal.d + seasonal.q > 0;
        if has_seasonal_terms && seasonal.period < 2 {
            return Err(RevfluxError::InvalidConfig(format!(
                "Seasonal period must be at least 2 when seasonal terms are set, got {}",
                seasonal.period
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SARIMA({},{},{})({},{},{},{})",
            self.order.p,
            self.order.d,
            self.order.q,
            self.seasonal_order.p,
            self.seasonal_order.d,
            self.seasonal_order.q,
            self.seasonal_order.period
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    #[schemars(description = "Rows with unparsable dates or values are dropped and only logged at debug level")]
    #[default]
    Silent,

    #[schemars(description = "Dropped rows are logged as warnings and their row indices are reported to the caller")]
    Report,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct TailLengthBounds {
    pub min: usize,
    pub max: usize,
    pub default: usize,
}

impl Default for TailLengthBounds {
    fn default() -> Self {
        Self {
            min: 6,
            max: 36,
            default: 12,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct EstimatorSettings {
    #[schemars(description = "Maximum Nelder-Mead iterations before the fit is reported as non-converged")]
    pub max_iterations: usize,

    #[schemars(description = "Relative tolerance on the objective spread of the simplex")]
    pub tolerance: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct RevfluxConfig {
    #[schemars(description = "Directory holding the persisted data, model, backup and active-dataset files")]
    pub storage_dir: PathBuf,

    #[schemars(description = "Name of the date-like column in uploads")]
    pub date_column: String,

    #[schemars(description = "Name of the numeric revenue column in uploads")]
    pub value_column: String,

    pub model: ModelSpec,

    #[schemars(description = "Confidence level of the forecast band, e.g. 0.95")]
    pub confidence_level: f64,

    #[schemars(description = "Histories shorter than this still train, but with a lower-confidence advisory")]
    pub recommended_history: usize,

    #[schemars(description = "Largest forecast horizon accepted by interactive sessions")]
    pub max_horizon: usize,

    pub default_horizon: usize,

    pub tail_length: TailLengthBounds,

    pub drop_policy: DropPolicy,

    pub estimator: EstimatorSettings,
}

impl Default for RevfluxConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("."),
            date_column: DEFAULT_DATE_COLUMN.to_string(),
            value_column: DEFAULT_VALUE_COLUMN.to_string(),
            model: ModelSpec::default(),
            confidence_level: 0.95,
            recommended_history: 24,
            max_horizon: 24,
            default_horizon: 6,
            tail_length: TailLengthBounds::default(),
            drop_policy: DropPolicy::default(),
            estimator: EstimatorSettings::default(),
        }
    }
}

impl RevfluxConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.date_column.trim().is_empty() || self.value_column.trim().is_empty() {
            return Err(RevfluxError::InvalidConfig(
                "Column names must not be empty".to_string(),
            ));
        }

        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(RevfluxError::InvalidConfig(format!(
                "Confidence level {} must be strictly between 0 and 1",
                self.confidence_level
            )));
        }

        if self.max_horizon == 0 || !(1..=self.max_horizon).contains(&self.default_horizon) {
            return Err(RevfluxError::InvalidConfig(format!(
                "Default horizon {} must be within 1..={}",
                self.default_horizon, self.max_horizon
            )));
        }

        let tail = &self.tail_length;
        if tail.min == 0 || tail.min > tail.max || !(tail.min..=tail.max).contains(&tail.default) {
            return Err(RevfluxError::InvalidConfig(format!(
                "Tail length bounds {}..={} (default {}) are inconsistent",
                tail.min, tail.max, tail.default
            )));
        }

        if self.estimator.max_iterations == 0 || !(self.estimator.tolerance > 0.0) {
            return Err(RevfluxError::InvalidConfig(
                "Estimator needs a positive iteration budget and tolerance".to_string(),
            ));
        }

        self.model.validate()
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RevfluxConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
