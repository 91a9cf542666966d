//! # RevFlux
//!
//! Monthly revenue forecasting: uploaded spreadsheets are normalized into a
//! clean monthly series, merged into a stored dataset (one value per month,
//! last write wins), fitted with a seasonal ARIMA model in `ln(1 + v)` space,
//! and extended into a forecast with confidence bounds that feeds charts and
//! a slide-deck report.
//!
//! ## Core Concepts
//!
//! - **Period**: a calendar month, always represented by its first day
//! - **Normalizer**: parses heterogeneous date cells and numeric amounts, dropping rows that cannot be read
//! - **Merger**: combines stored and uploaded rows; the latest row for a month replaces earlier ones
//! - **Adapter / Estimator**: log-transform in, seasonal ARIMA fit, back-transform out
//! - **Store**: datasets, trained models, backups and the active-dataset pointer
//! - **Session**: upload, train, forecast, reset, restore and export for one user
//!
//! ## Example
//!
//! ```rust,ignore
//! use revflux::*;
//!
//! let config = RevfluxConfig::default();
//! let store = FileStore::from_config(&config)?;
//! let mut session = SessionContext::open(store, CssSarimaEstimator::new(config.estimator), config)?;
//!
//! session.upload_file("penjualan.csv", &std::fs::read("penjualan.csv")?)?;
//! session.train()?;
//!
//! let forecast = session.forecast(6)?;
//! for (period, value, lower, upper) in forecast.rows() {
//!     println!("{} {} ({} - {})", format_month_year(period), format_rupiah(value),
//!         format_rupiah(lower), format_rupiah(upper));
//! }
//! ```

pub mod adapter;
pub mod error;
pub mod estimator;
pub mod forecaster;
pub mod ingestion;
pub mod merger;
pub mod normalizer;
pub mod optimize;
pub mod report;
pub mod sample;
pub mod schema;
pub mod session;
pub mod store;
pub mod utils;

pub use adapter::{Advisory, ModelAdapter, TrainedModel, TrainingOutcome};
pub use error::{Result, RevfluxError};
pub use estimator::{CssSarimaEstimator, LogSpaceForecast, LogSpaceModel, SarimaModel, SeasonalEstimator};
pub use forecaster::{forecast, forecast_from};
pub use ingestion::*;
pub use merger::{merge, merge_series, MergeOutcome};
pub use normalizer::{DateFormat, NormalizeReport, Normalized, Normalizer};
pub use report::{
    ChartRenderer, ChartSpec, DeckEncoder, ExportArtifact, JsonDeckEncoder, RasterImage, Slide,
    SlideDeck, UnavailableRenderer, PRESENTATION_MIME,
};
#[cfg(feature = "charts")]
pub use report::PlottersRenderer;
pub use schema::*;
pub use session::{SessionContext, TrainingSummary, UploadSummary};
pub use store::{DatasetStore, FileStore, MemoryStore};
pub use utils::*;

use log::{debug, info};

/// One-shot forecasting without a store or session.
pub struct RevenueForecaster;

impl RevenueForecaster {
    /// Fits the configured model on `series` and forecasts `horizon` months.
    pub fn forecast(
        series: &TimeSeries,
        horizon: usize,
        config: &RevfluxConfig,
    ) -> Result<ForecastResult> {
        config.validate()?;

        info!(
            "Forecasting {} months from {} months of history with {}",
            horizon,
            series.len(),
            config.model
        );

        let adapter = ModelAdapter::new(
            CssSarimaEstimator::new(config.estimator),
            config.recommended_history,
        );
        let outcome = adapter.fit(series, &config.model)?;

        for advisory in &outcome.advisories {
            debug!("Training advisory: {:?}", advisory);
        }

        forecast_from(&outcome.trained, horizon, config.confidence_level)
    }

    /// Normalizes and deduplicates an upload, then forecasts it.
    pub fn forecast_table(
        table: &RawTable,
        horizon: usize,
        config: &RevfluxConfig,
    ) -> Result<(TimeSeries, ForecastResult)> {
        let batch = Normalizer::from_config(config).normalize_batch(table)?;
        let series = merge(None, &batch).series;
        let forecast = Self::forecast(&series, horizon, config)?;
        Ok((series, forecast))
    }
}

pub fn forecast_revenue(
    series: &TimeSeries,
    horizon: usize,
    config: &RevfluxConfig,
) -> Result<ForecastResult> {
    RevenueForecaster::forecast(series, horizon, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{synthetic_history, SyntheticProfile};
    use chrono::NaiveDate;

    #[test]
    fn test_end_to_end_seasonal_forecast() {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let history = synthetic_history(start, 48, &SyntheticProfile::default(), 42).unwrap();

        let forecast = forecast_revenue(&history, 12, &RevfluxConfig::default()).unwrap();

        assert_eq!(forecast.len(), 12);
        assert_eq!(
            forecast.periods.first(),
            Some(&NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
        );
        for (_, point, lower, upper) in forecast.rows() {
            assert!(point.is_finite());
            assert!(lower <= point && point <= upper);
            assert!(lower > -1.0);
        }

        // Widths grow with the horizon.
        let first = forecast.upper_bound[0] - forecast.lower_bound[0];
        let last = forecast.upper_bound[11] - forecast.lower_bound[11];
        assert!(last > first);
    }

    #[test]
    fn test_forecast_table_from_template() {
        let table = read_csv(crate::sample::template_csv().as_bytes()).unwrap();
        let (series, forecast) =
            RevenueForecaster::forecast_table(&table, 3, &RevfluxConfig::default()).unwrap();

        assert_eq!(series.len(), 4);
        assert_eq!(
            forecast.periods,
            vec![
                NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            ]
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RevfluxConfig {
            confidence_level: 1.5,
            ..Default::default()
        };
        let history = TimeSeries::empty();
        assert!(matches!(
            forecast_revenue(&history, 3, &config),
            Err(RevfluxError::InvalidConfig(_))
        ));
    }
}
