use crate::error::{Result, RevfluxError};
use crate::estimator::SeasonalEstimator;
use crate::schema::{ModelArtifact, ModelSpec, TimeSeries};
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Non-blocking notes produced while training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Advisory {
    /// History is shorter than recommended; the forecast is less reliable.
    ShortHistory {
        observations: usize,
        recommended: usize,
    },
}

/// A fitted model together with what it was fitted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel<M> {
    pub model: M,
    pub spec: ModelSpec,
    pub last_period: NaiveDate,
    pub observations: usize,
    pub trained_at: DateTime<Utc>,
}

impl<M: Serialize + DeserializeOwned> TrainedModel<M> {
    pub fn to_artifact(&self) -> Result<ModelArtifact> {
        Ok(ModelArtifact::new(serde_json::to_vec(self)?))
    }

    pub fn from_artifact(artifact: &ModelArtifact) -> Result<Self> {
        Ok(serde_json::from_slice(&artifact.bytes)?)
    }
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome<M> {
    pub trained: TrainedModel<M>,
    pub advisories: Vec<Advisory>,
}

/// Fits revenue series in `ln(1 + v)` space through a [`SeasonalEstimator`].
pub struct ModelAdapter<E> {
    estimator: E,
    recommended_history: usize,
}

impl<E: SeasonalEstimator> ModelAdapter<E> {
    pub fn new(estimator: E, recommended_history: usize) -> Self {
        Self {
            estimator,
            recommended_history,
        }
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn fit(&self, series: &TimeSeries, spec: &ModelSpec) -> Result<TrainingOutcome<E::Model>> {
        let last_period = series.last_period().ok_or_else(|| {
            RevfluxError::InsufficientHistory {
                required: 1,
                actual: 0,
            }
        })?;

        if let Some(bad) = series.points().iter().find(|p| p.value < 0.0) {
            return Err(RevfluxError::InvalidValue {
                period: bad.period.format("%Y-%m").to_string(),
                value: bad.value,
            });
        }

        let log_values: Vec<f64> = series.values().into_iter().map(f64::ln_1p).collect();

        let mut advisories = Vec::new();
        if series.len() < self.recommended_history {
            warn!(
                "Training on {} months of history; at least {} are recommended for a reliable forecast",
                series.len(),
                self.recommended_history
            );
            advisories.push(Advisory::ShortHistory {
                observations: series.len(),
                recommended: self.recommended_history,
            });
        }

        let model = self.estimator.fit(&log_values, spec)?;

        info!(
            "Trained {} on {} months ending {}",
            spec,
            series.len(),
            last_period.format("%Y-%m")
        );

        Ok(TrainingOutcome {
            trained: TrainedModel {
                model,
                spec: *spec,
                last_period,
                observations: series.len(),
                trained_at: Utc::now(),
            },
            advisories,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FlatEstimator;
    use super::*;
    use crate::schema::TimeSeriesPoint;

    fn series(values: &[f64]) -> TimeSeries {
        let mut period = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut points = Vec::new();
        for v in values {
            points.push(TimeSeriesPoint::new(period, *v));
            period = crate::utils::next_month_start(period).unwrap();
        }
        TimeSeries::from_points(points).unwrap()
    }

    #[test]
    fn test_fit_passes_log1p_values() {
        let adapter = ModelAdapter::new(FlatEstimator::default(), 24);
        let s = series(&[0.0, 12_000_000.0, 13_500_000.0]);

        let outcome = adapter.fit(&s, &ModelSpec::default()).unwrap();
        let seen = adapter.estimator().seen.borrow();
        assert_eq!(seen[0][0], 0.0);
        assert!((seen[0][1] - 12_000_001f64.ln()).abs() < 1e-12);
        assert_eq!(
            outcome.trained.last_period,
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );
        assert_eq!(outcome.trained.observations, 3);
    }

    #[test]
    fn test_short_history_advisory() {
        let adapter = ModelAdapter::new(FlatEstimator::default(), 24);
        let outcome = adapter
            .fit(&series(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), &ModelSpec::default())
            .unwrap();
        assert_eq!(
            outcome.advisories,
            vec![Advisory::ShortHistory {
                observations: 6,
                recommended: 24
            }]
        );

        let adapter = ModelAdapter::new(FlatEstimator::default(), 3);
        let outcome = adapter
            .fit(&series(&[1.0, 2.0, 3.0]), &ModelSpec::default())
            .unwrap();
        assert!(outcome.advisories.is_empty());
    }

    #[test]
    fn test_negative_values_rejected() {
        let adapter = ModelAdapter::new(FlatEstimator::default(), 24);
        let err = adapter
            .fit(&series(&[5.0, -1.0]), &ModelSpec::default())
            .unwrap_err();
        assert!(matches!(err, RevfluxError::InvalidValue { ref period, .. } if period == "2025-02"));
        assert!(adapter.estimator().seen.borrow().is_empty());
    }

    #[test]
    fn test_empty_series_is_insufficient() {
        let adapter = ModelAdapter::new(FlatEstimator::default(), 24);
        let err = adapter
            .fit(&TimeSeries::empty(), &ModelSpec::default())
            .unwrap_err();
        assert!(matches!(err, RevfluxError::InsufficientHistory { actual: 0, .. }));
    }

    #[test]
    fn test_artifact_round_trip() {
        let adapter = ModelAdapter::new(FlatEstimator::default(), 24);
        let outcome = adapter
            .fit(&series(&[10.0, 20.0]), &ModelSpec::default())
            .unwrap();

        let artifact = outcome.trained.to_artifact().unwrap();
        let restored = TrainedModel::from_artifact(&artifact).unwrap();
        assert_eq!(outcome.trained, restored);

        let garbage = ModelArtifact::new(b"not json".to_vec());
        assert!(TrainedModel::<super::test_support::FlatModel>::from_artifact(&garbage).is_err());
    }
}
