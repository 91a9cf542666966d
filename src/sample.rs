//! Template upload and synthetic histories for demos and tests.

use crate::error::{Result, RevfluxError};
use crate::schema::{TimeSeries, TimeSeriesPoint, DEFAULT_DATE_COLUMN, DEFAULT_VALUE_COLUMN};
use crate::utils::{first_of_month, next_month_start};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

const TEMPLATE_VALUES: [f64; 4] = [12_000_000.0, 13_500_000.0, 15_000_000.0, 14_500_000.0];

/// CSV users can download, fill in and upload.
pub fn template_csv() -> String {
    let mut csv = format!("{},{}\n", DEFAULT_DATE_COLUMN, DEFAULT_VALUE_COLUMN);
    for (month, value) in TEMPLATE_VALUES.iter().enumerate() {
        csv.push_str(&format!("2025-{:02}-01,{:.0}\n", month + 1, value));
    }
    csv
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticProfile {
    pub base: f64,
    /// Relative growth per month.
    pub growth: f64,
    /// Relative amplitude of the yearly cycle.
    pub seasonal_amplitude: f64,
    /// Relative standard deviation of the noise.
    pub noise: f64,
}

impl Default for SyntheticProfile {
    fn default() -> Self {
        Self {
            base: 12_000_000.0,
            growth: 0.01,
            seasonal_amplitude: 0.15,
            noise: 0.03,
        }
    }
}

/// Monthly revenue with trend, a 12-month cycle and multiplicative noise.
/// The same seed always yields the same series.
pub fn synthetic_history(
    start: NaiveDate,
    months: usize,
    profile: &SyntheticProfile,
    seed: u64,
) -> Result<TimeSeries> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, profile.noise)
        .map_err(|e| RevfluxError::InvalidConfig(format!("Invalid noise level: {}", e)))?;

    let mut period = first_of_month(start);
    let mut points = Vec::with_capacity(months);
    for t in 0..months {
        let trend = profile.base * (1.0 + profile.growth).powi(t as i32);
        let angle = 2.0 * std::f64::consts::PI * (t % 12) as f64 / 12.0;
        let seasonal = 1.0 + profile.seasonal_amplitude * angle.sin();
        let value = (trend * seasonal * (1.0 + noise.sample(&mut rng))).max(0.0);

        points.push(TimeSeriesPoint::new(period, value.round()));
        period = next_month_start(period)?;
    }

    TimeSeries::from_points(points)
}
