use crate::adapter::TrainedModel;
use crate::error::{Result, RevfluxError};
use crate::estimator::LogSpaceModel;
use crate::schema::ForecastResult;
use crate::utils::month_starts_after;
use chrono::NaiveDate;
use log::debug;

/// Extends a trained model `horizon` months past `last_period`, back in the
/// original scale (`exp(x) - 1`).
pub fn forecast<M: LogSpaceModel>(
    trained: &TrainedModel<M>,
    horizon: usize,
    last_period: NaiveDate,
    confidence_level: f64,
) -> Result<ForecastResult> {
    if horizon == 0 {
        return Err(RevfluxError::InvalidHorizon {
            horizon,
            reason: "at least one month must be forecast".to_string(),
        });
    }

    let log_forecast = trained.model.forecast_log(horizon, confidence_level)?;
    let periods = month_starts_after(last_period, horizon)?;

    debug!(
        "Forecast {} months from {} to {}",
        horizon,
        last_period.format("%Y-%m"),
        periods.last().map(|p| p.format("%Y-%m").to_string()).unwrap_or_default()
    );

    let result = ForecastResult {
        periods,
        point_forecast: log_forecast.mean.into_iter().map(f64::exp_m1).collect(),
        lower_bound: log_forecast.lower.into_iter().map(f64::exp_m1).collect(),
        upper_bound: log_forecast.upper.into_iter().map(f64::exp_m1).collect(),
        confidence_level,
    };

    if let Some((period, ..)) = result
        .rows()
        .find(|(_, point, lower, upper)| !(point.is_finite() && lower.is_finite() && upper.is_finite()))
    {
        return Err(RevfluxError::NumericalFailure(format!(
            "Forecast for {} overflows after the inverse log transform",
            period.format("%Y-%m")
        )));
    }

    Ok(result)
}

/// [`forecast`] from the last month the model was trained on. Use
/// [`forecast`] with the stored series' last month when data was added
/// after training.
pub fn forecast_from<M: LogSpaceModel>(
    trained: &TrainedModel<M>,
    horizon: usize,
    confidence_level: f64,
) -> Result<ForecastResult> {
    forecast(trained, horizon, trained.last_period, confidence_level)
}
