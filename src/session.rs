use crate::adapter::{Advisory, ModelAdapter, TrainedModel};
use crate::error::{Result, RevfluxError};
use crate::estimator::SeasonalEstimator;
use crate::forecaster;
use crate::ingestion::{read_upload, RawTable};
use crate::merger::merge;
use crate::normalizer::{NormalizeReport, Normalizer};
use crate::report::{ChartRenderer, DeckEncoder, ExportArtifact, SlideDeck};
use crate::schema::{Dataset, DatasetId, ForecastResult, ModelSpec, RevfluxConfig, TimeSeries};
use crate::store::DatasetStore;
use chrono::NaiveDate;
use log::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct UploadSummary {
    pub dataset: DatasetId,
    pub rows_read: usize,
    pub rows_accepted: usize,
    pub removed_duplicates: usize,
    pub total_points: usize,
    pub first_period: Option<NaiveDate>,
    pub last_period: Option<NaiveDate>,
    pub report: NormalizeReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub dataset: DatasetId,
    pub spec: ModelSpec,
    pub observations: usize,
    pub last_period: NaiveDate,
    pub advisories: Vec<Advisory>,
}

/// State of one interactive session: which dataset is active and its trained
/// model, on top of a [`DatasetStore`].
///
/// Every mutating operation computes its result first and writes to the
/// store last, so a failure leaves persisted state untouched.
pub struct SessionContext<S, E: SeasonalEstimator> {
    store: S,
    adapter: ModelAdapter<E>,
    normalizer: Normalizer,
    config: RevfluxConfig,
    active: Option<DatasetId>,
    trained: Option<TrainedModel<E::Model>>,
}

impl<S, E> SessionContext<S, E>
where
    S: DatasetStore,
    E: SeasonalEstimator,
{
    /// Opens a session, picking up the persisted active dataset and its model.
    pub fn open(store: S, estimator: E, config: RevfluxConfig) -> Result<Self> {
        config.validate()?;

        let mut session = Self {
            adapter: ModelAdapter::new(estimator, config.recommended_history),
            normalizer: Normalizer::from_config(&config),
            store,
            config,
            active: None,
            trained: None,
        };

        let active = session.store.active().unwrap_or_else(|e| {
            warn!("Active dataset pointer could not be read, starting empty: {}", e);
            None
        });

        if let Some(id) = active {
            match session.store.get(&id)? {
                Some(dataset) => {
                    session.trained = load_model(&dataset);
                    session.active = Some(id);
                }
                None => warn!("Active dataset {} has no stored data; starting empty", id),
            }
        }

        Ok(session)
    }

    pub fn config(&self) -> &RevfluxConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn active_dataset(&self) -> Option<&DatasetId> {
        self.active.as_ref()
    }

    pub fn trained_model(&self) -> Option<&TrainedModel<E::Model>> {
        self.trained.as_ref()
    }

    fn active_id(&self) -> Result<&DatasetId> {
        self.active.as_ref().ok_or(RevfluxError::NoActiveDataset)
    }

    /// Stored series of the active dataset.
    pub fn history(&self) -> Result<TimeSeries> {
        let id = self.active_id()?;
        self.store
            .get(id)?
            .map(|d| d.series)
            .ok_or_else(|| RevfluxError::DatasetNotFound(id.to_string()))
    }

    /// Reads an uploaded file and merges it into the active dataset.
    pub fn upload_file(&mut self, file_name: &str, bytes: &[u8]) -> Result<UploadSummary> {
        let table = read_upload(file_name, bytes)?;
        self.upload(file_name, &table)
    }

    /// Merges an upload into the active dataset, or starts a new dataset named
    /// after the file when none is active.
    pub fn upload(&mut self, file_name: &str, table: &RawTable) -> Result<UploadSummary> {
        let id = match &self.active {
            Some(id) => id.clone(),
            None => DatasetId::from_file_name(file_name)?,
        };

        let normalized = self.normalizer.normalize(table)?;
        let report = normalized.report.clone();
        let batch = normalized.into_batch()?;
        let rows_accepted = batch.len();

        let existing = self.store.get(&id)?;
        let outcome = merge(existing.as_ref().map(|d| &d.series), &batch);

        let dataset = Dataset {
            id: id.clone(),
            series: outcome.series,
            model: existing.and_then(|d| d.model),
        };
        self.store.put(&dataset)?;
        self.store.set_active(&id)?;
        self.active = Some(id.clone());

        info!(
            "Uploaded {} into dataset {}: {} rows accepted, {} duplicates replaced, {} months stored",
            file_name,
            id,
            rows_accepted,
            outcome.removed_duplicates,
            dataset.series.len()
        );

        Ok(UploadSummary {
            dataset: id,
            rows_read: report.input_rows,
            rows_accepted,
            removed_duplicates: outcome.removed_duplicates,
            total_points: dataset.series.len(),
            first_period: dataset.series.first_period(),
            last_period: dataset.series.last_period(),
            report,
        })
    }

    /// Fits the configured model on the active dataset and stores it.
    pub fn train(&mut self) -> Result<TrainingSummary> {
        let id = self.active_id()?.clone();
        let dataset = self
            .store
            .get(&id)?
            .ok_or_else(|| RevfluxError::DatasetNotFound(id.to_string()))?;

        let outcome = self.adapter.fit(&dataset.series, &self.config.model)?;
        let artifact = outcome.trained.to_artifact()?;

        self.store.put(&Dataset {
            model: Some(artifact),
            ..dataset
        })?;

        let summary = TrainingSummary {
            dataset: id,
            spec: outcome.trained.spec,
            observations: outcome.trained.observations,
            last_period: outcome.trained.last_period,
            advisories: outcome.advisories,
        };
        self.trained = Some(outcome.trained);
        Ok(summary)
    }

    /// Forecasts `horizon` months after the last stored month of the active
    /// dataset, which may be later than the month the model was trained on.
    pub fn forecast(&self, horizon: usize) -> Result<ForecastResult> {
        let max = self.config.max_horizon;
        if !(1..=max).contains(&horizon) {
            return Err(RevfluxError::InvalidHorizon {
                horizon,
                reason: format!("must be between 1 and {}", max),
            });
        }

        let id = self.active_id()?;
        let trained = self
            .trained
            .as_ref()
            .ok_or_else(|| RevfluxError::ModelNotTrained(id.to_string()))?;

        let last_period = self
            .history()?
            .last_period()
            .ok_or(RevfluxError::InsufficientHistory {
                required: 1,
                actual: 0,
            })?;

        forecaster::forecast(trained, horizon, last_period, self.config.confidence_level)
    }

    /// Backs up and removes the active dataset. Returns the id that was reset,
    /// or `None` when nothing was active.
    pub fn reset_dataset(&mut self) -> Result<Option<DatasetId>> {
        let Some(id) = self.active.clone() else {
            return Ok(None);
        };

        self.store.backup(&id)?;
        self.store.remove(&id)?;
        self.store.clear_active()?;
        self.reset();

        info!("Dataset {} reset; backup kept", id);
        Ok(Some(id))
    }

    /// Restores the active dataset from its backup, or the first dataset that
    /// has one when nothing is active.
    pub fn restore(&mut self) -> Result<DatasetId> {
        let id = match self.active.clone() {
            Some(id) => id,
            None => self
                .store
                .backups()?
                .into_iter()
                .next()
                .ok_or(RevfluxError::NothingToRestore)?,
        };

        let dataset = self.store.restore(&id)?;
        self.store.set_active(&id)?;
        self.trained = load_model(&dataset);
        self.active = Some(id.clone());

        info!(
            "Restored dataset {} ({} months, model {})",
            id,
            dataset.series.len(),
            if self.trained.is_some() { "loaded" } else { "absent" }
        );
        Ok(id)
    }

    /// Removes every stored dataset and backup and clears the session.
    pub fn reinitialize(&mut self) -> Result<usize> {
        let removed = self.store.purge()?;
        self.reset();
        info!("Reinitialized storage; {} datasets removed", removed);
        Ok(removed)
    }

    /// Forgets the in-memory state without touching the store.
    pub fn reset(&mut self) {
        self.active = None;
        self.trained = None;
    }

    pub fn build_report(
        &self,
        horizon: usize,
        tail_length: usize,
        renderer: &dyn ChartRenderer,
    ) -> Result<SlideDeck> {
        let forecast = self.forecast(horizon)?;
        let history = self.history()?;
        SlideDeck::build(
            self.active_id()?,
            &history,
            &forecast,
            tail_length,
            &self.config.tail_length,
            renderer,
        )
    }

    pub fn export(
        &self,
        horizon: usize,
        tail_length: usize,
        renderer: &dyn ChartRenderer,
        encoder: &dyn DeckEncoder,
    ) -> Result<ExportArtifact> {
        let deck = self.build_report(horizon, tail_length, renderer)?;
        encoder.export(&deck)
    }
}

fn load_model<M: serde::de::DeserializeOwned + serde::Serialize>(
    dataset: &Dataset,
) -> Option<TrainedModel<M>> {
    let artifact = dataset.model.as_ref()?;
    match TrainedModel::from_artifact(artifact) {
        Ok(model) => Some(model),
        Err(e) => {
            warn!("Stored model for {} could not be loaded, retrain required: {}", dataset.id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::FlatEstimator;
    use crate::report::{JsonDeckEncoder, Slide, UnavailableRenderer};
    use crate::store::{FileStore, MemoryStore, ACTIVE_POINTER_FILE};

    type TestSession = SessionContext<MemoryStore, FlatEstimator>;

    fn month(year: i32, month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, 1).unwrap()
    }

    fn session() -> TestSession {
        SessionContext::open(MemoryStore::new(), FlatEstimator::default(), RevfluxConfig::default())
            .unwrap()
    }

    fn upload_table() -> RawTable {
        RawTable::from_pairs(
            "Periode",
            "Pemasukan",
            vec![
                ("2025-01-15", "12000000"),
                ("2025-01-31", "13000000"),
                ("2025-02-01", "14000000"),
            ],
        )
    }

    #[test]
    fn test_upload_scenario() {
        let mut s = session();
        let summary = s.upload("penjualan.csv", &upload_table()).unwrap();

        assert_eq!(summary.dataset.as_str(), "penjualan");
        assert_eq!(summary.rows_read, 3);
        assert_eq!(summary.rows_accepted, 3);
        assert_eq!(summary.removed_duplicates, 1);
        assert_eq!(summary.total_points, 2);

        let history = s.history().unwrap();
        assert_eq!(history.get(month(2025, 1)), Some(13_000_000.0));
        assert_eq!(history.get(month(2025, 2)), Some(14_000_000.0));
        assert_eq!(s.store().active().unwrap(), Some(summary.dataset.clone()));

        let same_rows = RawTable::from_pairs(
            "Periode",
            "Pemasukan",
            vec![("2025-01-01", "13000000"), ("2025-02-01", "14000000")],
        );
        let again = s.upload("other_name.csv", &same_rows).unwrap();
        assert_eq!(again.dataset.as_str(), "penjualan");
        assert_eq!(again.removed_duplicates, 2);
        assert_eq!(s.history().unwrap(), history);
    }

    #[test]
    fn test_failed_upload_leaves_state_unchanged() {
        let mut s = session();
        let missing_value = RawTable::from_pairs("Periode", "Revenue", vec![("2025-01-01", "1")]);
        let err = s.upload("sales.csv", &missing_value).unwrap_err();

        assert!(err.is_schema_error());
        assert!(s.active_dataset().is_none());
        assert_eq!(s.store().active().unwrap(), None);
        assert!(s.store().backups().unwrap().is_empty());
    }

    #[test]
    fn test_train_and_forecast() {
        let mut s = session();
        assert!(matches!(s.train(), Err(RevfluxError::NoActiveDataset)));

        s.upload("sales.csv", &upload_table()).unwrap();
        assert!(matches!(s.forecast(6), Err(RevfluxError::ModelNotTrained(_))));

        let summary = s.train().unwrap();
        assert_eq!(summary.observations, 2);
        assert_eq!(summary.last_period, month(2025, 2));
        assert_eq!(summary.advisories.len(), 1);

        let forecast = s.forecast(6).unwrap();
        assert_eq!(forecast.periods.first(), Some(&month(2025, 3)));
        assert_eq!(forecast.last_period(), Some(month(2025, 8)));
        assert!((forecast.point_forecast[0] - 14_000_000.0).abs() < 1e-3);

        for bad in [0, 25] {
            assert!(matches!(
                s.forecast(bad),
                Err(RevfluxError::InvalidHorizon { .. })
            ));
        }

        let stored = s.store().get(&summary.dataset).unwrap().unwrap();
        assert!(stored.model.is_some());
    }

    #[test]
    fn test_upload_keeps_trained_model() {
        let mut s = session();
        s.upload("sales.csv", &upload_table()).unwrap();
        s.train().unwrap();

        let march = RawTable::from_pairs("Periode", "Pemasukan", vec![("2025-03-01", "1")]);
        s.upload("sales.csv", &march).unwrap();
        let stored = s.store().get(s.active_dataset().unwrap()).unwrap().unwrap();
        assert!(stored.model.is_some());
        assert_eq!(stored.series.len(), 3);
    }

    #[test]
    fn test_forecast_follows_uploads_after_training() {
        let mut s = session();
        s.upload("sales.csv", &upload_table()).unwrap();
        s.train().unwrap();

        let later = RawTable::from_pairs(
            "Periode",
            "Pemasukan",
            vec![("2025-03-01", "15000000"), ("2025-04-01", "16000000")],
        );
        s.upload("sales.csv", &later).unwrap();
        assert_eq!(s.trained_model().unwrap().last_period, month(2025, 2));

        let forecast = s.forecast(3).unwrap();
        assert_eq!(
            forecast.periods,
            vec![month(2025, 5), month(2025, 6), month(2025, 7)]
        );

        let deck = s.build_report(3, 12, &UnavailableRenderer).unwrap();
        match &deck.slides[1] {
            Slide::Summary { lines, .. } => assert!(lines[0].starts_with("May 2025")),
            other => panic!("unexpected slide {:?}", other),
        }
    }

    #[test]
    fn test_unreadable_pointer_opens_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ACTIVE_POINTER_FILE), "../escape").unwrap();

        let store = FileStore::new(dir.path()).unwrap();
        let mut s =
            SessionContext::open(store, FlatEstimator::default(), RevfluxConfig::default())
                .unwrap();
        assert!(s.active_dataset().is_none());

        assert_eq!(s.reinitialize().unwrap(), 0);
        assert!(!dir.path().join(ACTIVE_POINTER_FILE).exists());
    }

    #[test]
    fn test_reopen_loads_active_model() {
        let mut s = session();
        s.upload("sales.csv", &upload_table()).unwrap();
        s.train().unwrap();

        let store = s.store().clone();
        let reopened =
            TestSession::open(store, FlatEstimator::default(), RevfluxConfig::default()).unwrap();
        assert_eq!(reopened.active_dataset().map(|id| id.as_str()), Some("sales"));
        assert!(reopened.forecast(3).is_ok());
    }

    #[test]
    fn test_reset_and_restore() {
        let mut s = session();
        assert_eq!(s.reset_dataset().unwrap(), None);
        assert!(matches!(s.restore(), Err(RevfluxError::NothingToRestore)));

        s.upload("sales.csv", &upload_table()).unwrap();
        s.train().unwrap();
        let before = s.history().unwrap();

        let reset = s.reset_dataset().unwrap();
        assert_eq!(reset.map(|id| id.to_string()), Some("sales".to_string()));
        assert!(s.active_dataset().is_none());
        assert!(matches!(s.history(), Err(RevfluxError::NoActiveDataset)));

        let restored = s.restore().unwrap();
        assert_eq!(restored.as_str(), "sales");
        assert_eq!(s.history().unwrap(), before);
        assert!(s.trained_model().is_some());
        assert_eq!(s.store().active().unwrap(), Some(restored));
    }

    #[test]
    fn test_reinitialize_clears_everything() {
        let mut s = session();
        s.upload("sales.csv", &upload_table()).unwrap();
        s.reset_dataset().unwrap();
        s.upload("other.csv", &upload_table()).unwrap();

        assert_eq!(s.reinitialize().unwrap(), 2);
        assert!(s.active_dataset().is_none());
        assert!(matches!(s.restore(), Err(RevfluxError::NothingToRestore)));
    }

    #[test]
    fn test_export_artifact() {
        let mut s = session();
        s.upload("sales.csv", &upload_table()).unwrap();
        s.train().unwrap();

        let artifact = s
            .export(6, 12, &UnavailableRenderer, &JsonDeckEncoder::default())
            .unwrap();
        assert_eq!(artifact.file_name, "laporan_prediksi_sales.json");

        let deck: SlideDeck = serde_json::from_slice(&artifact.bytes).unwrap();
        assert_eq!(deck.placeholder_count(), 3);

        assert!(matches!(
            s.export(6, 3, &UnavailableRenderer, &JsonDeckEncoder::default()),
            Err(RevfluxError::InvalidTailLength { .. })
        ));
    }
}
