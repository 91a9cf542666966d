//! Persistence of datasets, trained models, their backups and the
//! active-dataset pointer.

use crate::error::{Result, RevfluxError};
use crate::ingestion::read_csv;
use crate::normalizer::Normalizer;
use crate::schema::{
    Dataset, DatasetId, ModelArtifact, RevfluxConfig, TimeSeries, DEFAULT_DATE_COLUMN,
    DEFAULT_VALUE_COLUMN,
};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const ACTIVE_POINTER_FILE: &str = "active_dataset.txt";

const DATA_SUFFIX: &str = "_data.csv";
const MODEL_SUFFIX: &str = "_model.json";
const DATA_BACKUP_SUFFIX: &str = "_data_backup.csv";
const MODEL_BACKUP_SUFFIX: &str = "_model_backup.json";

/// Storage for datasets keyed by [`DatasetId`].
///
/// Absence is `Ok(None)` rather than an error. Mutations either complete or
/// leave the previous state in place.
pub trait DatasetStore {
    fn get(&self, id: &DatasetId) -> Result<Option<Dataset>>;

    /// Replaces the stored series and model. A dataset without a model
    /// removes any previously stored model.
    fn put(&mut self, dataset: &Dataset) -> Result<()>;

    /// Removes the live dataset. Returns true if it existed.
    fn remove(&mut self, id: &DatasetId) -> Result<bool>;

    /// Copies the live dataset into its backup slot. Returns false when there
    /// is nothing to back up.
    fn backup(&mut self, id: &DatasetId) -> Result<bool>;

    /// Copies the backup back into the live slot and returns it.
    fn restore(&mut self, id: &DatasetId) -> Result<Dataset>;

    /// Datasets that have a backup, sorted by id.
    fn backups(&self) -> Result<Vec<DatasetId>>;

    fn active(&self) -> Result<Option<DatasetId>>;

    fn set_active(&mut self, id: &DatasetId) -> Result<()>;

    fn clear_active(&mut self) -> Result<()>;

    /// Removes every dataset, backup and the active pointer. Returns the
    /// number of distinct datasets that had anything stored.
    fn purge(&mut self) -> Result<usize>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    datasets: BTreeMap<DatasetId, Dataset>,
    backups: BTreeMap<DatasetId, Dataset>,
    active: Option<DatasetId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DatasetStore for MemoryStore {
    fn get(&self, id: &DatasetId) -> Result<Option<Dataset>> {
        Ok(self.datasets.get(id).cloned())
    }

    fn put(&mut self, dataset: &Dataset) -> Result<()> {
        self.datasets.insert(dataset.id.clone(), dataset.clone());
        Ok(())
    }

    fn remove(&mut self, id: &DatasetId) -> Result<bool> {
        Ok(self.datasets.remove(id).is_some())
    }

    fn backup(&mut self, id: &DatasetId) -> Result<bool> {
        match self.datasets.get(id) {
            Some(dataset) => {
                self.backups.insert(id.clone(), dataset.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn restore(&mut self, id: &DatasetId) -> Result<Dataset> {
        let dataset = self
            .backups
            .get(id)
            .cloned()
            .ok_or_else(|| RevfluxError::BackupNotFound(id.to_string()))?;
        self.datasets.insert(id.clone(), dataset.clone());
        Ok(dataset)
    }

    fn backups(&self) -> Result<Vec<DatasetId>> {
        Ok(self.backups.keys().cloned().collect())
    }

    fn active(&self) -> Result<Option<DatasetId>> {
        Ok(self.active.clone())
    }

    fn set_active(&mut self, id: &DatasetId) -> Result<()> {
        self.active = Some(id.clone());
        Ok(())
    }

    fn clear_active(&mut self) -> Result<()> {
        self.active = None;
        Ok(())
    }

    fn purge(&mut self) -> Result<usize> {
        let ids: BTreeSet<&DatasetId> = self.datasets.keys().chain(self.backups.keys()).collect();
        let count = ids.len();
        self.datasets.clear();
        self.backups.clear();
        self.active = None;
        Ok(count)
    }
}

/// Flat-directory store: `{id}_data.csv`, `{id}_model.json`, their `_backup`
/// counterparts and `active_dataset.txt`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn from_config(config: &RevfluxConfig) -> Result<Self> {
        Self::new(config.storage_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_path(&self, id: &DatasetId) -> PathBuf {
        self.root.join(format!("{}{}", id, DATA_SUFFIX))
    }

    pub fn model_path(&self, id: &DatasetId) -> PathBuf {
        self.root.join(format!("{}{}", id, MODEL_SUFFIX))
    }

    fn data_backup_path(&self, id: &DatasetId) -> PathBuf {
        self.root.join(format!("{}{}", id, DATA_BACKUP_SUFFIX))
    }

    fn model_backup_path(&self, id: &DatasetId) -> PathBuf {
        self.root.join(format!("{}{}", id, MODEL_BACKUP_SUFFIX))
    }

    fn pointer_path(&self) -> PathBuf {
        self.root.join(ACTIVE_POINTER_FILE)
    }

    fn read_dataset(&self, id: &DatasetId, data: &Path, model: &Path) -> Result<Option<Dataset>> {
        let Some(bytes) = read_if_exists(data)? else {
            return Ok(None);
        };
        let series = decode_series(&bytes)?;
        let model = read_if_exists(model)?.map(ModelArtifact::new);

        Ok(Some(Dataset {
            id: id.clone(),
            series,
            model,
        }))
    }

    /// Ids of every stored file matching one of the dataset suffixes.
    fn stored_files(&self) -> Result<Vec<(DatasetId, PathBuf)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let stem = [DATA_BACKUP_SUFFIX, MODEL_BACKUP_SUFFIX, DATA_SUFFIX, MODEL_SUFFIX]
                .iter()
                .find_map(|suffix| name.strip_suffix(suffix));
            if let Some(stem) = stem {
                if let Ok(id) = DatasetId::new(stem) {
                    found.push((id, entry.path()));
                }
            }
        }
        Ok(found)
    }
}

impl DatasetStore for FileStore {
    fn get(&self, id: &DatasetId) -> Result<Option<Dataset>> {
        self.read_dataset(id, &self.data_path(id), &self.model_path(id))
    }

    /// The series is staged before the model is touched and only replaces
    /// the live file once the model step has succeeded, so a failure never
    /// leaves new data beside an old model.
    fn put(&mut self, dataset: &Dataset) -> Result<()> {
        let id = &dataset.id;
        let data_path = self.data_path(id);
        let staged_data = stage(&data_path, &encode_series(&dataset.series)?)?;

        let model_step = match &dataset.model {
            Some(model) => write_atomic(&self.model_path(id), &model.bytes),
            None => remove_if_exists(&self.model_path(id)).map(|_| ()),
        };
        if let Err(e) = model_step {
            let _ = fs::remove_file(&staged_data);
            return Err(e);
        }

        commit(&staged_data, &data_path)?;
        debug!("Stored dataset {} ({} points)", id, dataset.series.len());
        Ok(())
    }

    fn remove(&mut self, id: &DatasetId) -> Result<bool> {
        let data = remove_if_exists(&self.data_path(id))?;
        let model = remove_if_exists(&self.model_path(id))?;
        Ok(data || model)
    }

    fn backup(&mut self, id: &DatasetId) -> Result<bool> {
        let Some(data) = read_if_exists(&self.data_path(id))? else {
            return Ok(false);
        };
        let backup_path = self.data_backup_path(id);
        let staged_data = stage(&backup_path, &data)?;

        let model_step = match read_if_exists(&self.model_path(id)) {
            Ok(Some(model)) => write_atomic(&self.model_backup_path(id), &model),
            Ok(None) => remove_if_exists(&self.model_backup_path(id)).map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = model_step {
            let _ = fs::remove_file(&staged_data);
            return Err(e);
        }

        commit(&staged_data, &backup_path)?;

        info!("Backed up dataset {}", id);
        Ok(true)
    }

    fn restore(&mut self, id: &DatasetId) -> Result<Dataset> {
        let dataset = self
            .read_dataset(id, &self.data_backup_path(id), &self.model_backup_path(id))?
            .ok_or_else(|| RevfluxError::BackupNotFound(id.to_string()))?;

        self.put(&dataset)?;
        info!("Restored dataset {} from backup", id);
        Ok(dataset)
    }

    fn backups(&self) -> Result<Vec<DatasetId>> {
        let ids: BTreeSet<DatasetId> = self
            .stored_files()?
            .into_iter()
            .filter(|(_, path)| path.to_string_lossy().ends_with(DATA_BACKUP_SUFFIX))
            .map(|(id, _)| id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    fn active(&self) -> Result<Option<DatasetId>> {
        match read_if_exists(&self.pointer_path())? {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                if text.trim().is_empty() {
                    Ok(None)
                } else {
                    DatasetId::new(text.trim()).map(Some)
                }
            }
            None => Ok(None),
        }
    }

    fn set_active(&mut self, id: &DatasetId) -> Result<()> {
        write_atomic(&self.pointer_path(), id.as_str().as_bytes())
    }

    fn clear_active(&mut self) -> Result<()> {
        remove_if_exists(&self.pointer_path())?;
        Ok(())
    }

    fn purge(&mut self) -> Result<usize> {
        let files = self.stored_files()?;
        let ids: BTreeSet<&DatasetId> = files.iter().map(|(id, _)| id).collect();
        let count = ids.len();

        for (_, path) in &files {
            remove_if_exists(path)?;
        }
        self.clear_active()?;

        info!("Purged {} datasets ({} files) from {}", count, files.len(), self.root.display());
        Ok(count)
    }
}

fn encode_series(series: &TimeSeries) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([DEFAULT_DATE_COLUMN, DEFAULT_VALUE_COLUMN])?;
    for point in series.points() {
        writer.write_record([
            point.period.format("%Y-%m-%d").to_string(),
            point.value.to_string(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| RevfluxError::IoError(e.into_error()))
}

fn decode_series(bytes: &[u8]) -> Result<TimeSeries> {
    let table = read_csv(bytes)?;
    let batch = Normalizer::new(DEFAULT_DATE_COLUMN, DEFAULT_VALUE_COLUMN).normalize_batch(&table)?;
    TimeSeries::from_points(batch.points)
}

fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Writes `bytes` to a sibling temporary file and returns its path.
fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    if let Err(e) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(tmp)
}

/// Renames a staged file over `path`.
fn commit(staged: &Path, path: &Path) -> Result<()> {
    if let Err(e) = fs::rename(staged, path) {
        let _ = fs::remove_file(staged);
        return Err(e.into());
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let staged = stage(path, bytes)?;
    commit(&staged, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TimeSeriesPoint;
    use chrono::NaiveDate;

    fn id(name: &str) -> DatasetId {
        DatasetId::new(name).unwrap()
    }

    fn dataset(name: &str, values: &[(u32, f64)]) -> Dataset {
        let points = values
            .iter()
            .map(|&(m, v)| TimeSeriesPoint::new(NaiveDate::from_ymd_opt(2025, m, 1).unwrap(), v))
            .collect();
        Dataset::new(id(name), TimeSeries::from_points(points).unwrap())
    }

    fn exercise_store<S: DatasetStore>(store: &mut S) {
        assert_eq!(store.get(&id("sales")).unwrap(), None);
        assert_eq!(store.active().unwrap(), None);
        assert!(!store.backup(&id("sales")).unwrap());

        let mut ds = dataset("sales", &[(1, 12_000_000.0), (2, 13_500_000.0)]);
        ds.model = Some(ModelArtifact::new(b"{\"level\":1.0}".to_vec()));
        store.put(&ds).unwrap();
        store.set_active(&ds.id).unwrap();

        assert_eq!(store.get(&ds.id).unwrap(), Some(ds.clone()));
        assert_eq!(store.active().unwrap(), Some(ds.id.clone()));

        assert!(store.backup(&ds.id).unwrap());
        assert!(store.remove(&ds.id).unwrap());
        assert!(!store.remove(&ds.id).unwrap());
        assert_eq!(store.get(&ds.id).unwrap(), None);
        assert_eq!(store.backups().unwrap(), vec![ds.id.clone()]);

        let restored = store.restore(&ds.id).unwrap();
        assert_eq!(restored, ds);
        assert_eq!(store.get(&ds.id).unwrap(), Some(ds.clone()));

        assert!(matches!(
            store.restore(&id("other")),
            Err(RevfluxError::BackupNotFound(_))
        ));

        store.put(&dataset("other", &[(3, 1.0)])).unwrap();
        assert_eq!(store.purge().unwrap(), 2);
        assert_eq!(store.get(&ds.id).unwrap(), None);
        assert!(store.backups().unwrap().is_empty());
        assert_eq!(store.active().unwrap(), None);
    }

    #[test]
    fn test_memory_store_semantics() {
        exercise_store(&mut MemoryStore::new());
    }

    #[test]
    fn test_file_store_semantics() {
        let dir = tempfile::tempdir().unwrap();
        exercise_store(&mut FileStore::new(dir.path()).unwrap());
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path()).unwrap();
        let ds = dataset("toko", &[(2, 14_000_000.0), (1, 13_000_000.0)]);
        store.put(&ds).unwrap();
        store.set_active(&ds.id).unwrap();

        let csv = fs::read_to_string(dir.path().join("toko_data.csv")).unwrap();
        assert_eq!(
            csv,
            "Periode,Pemasukan\n2025-01-01,13000000\n2025-02-01,14000000\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join(ACTIVE_POINTER_FILE)).unwrap(),
            "toko"
        );
        assert!(!dir.path().join("toko_model.json").exists());

        store.backup(&ds.id).unwrap();
        assert!(dir.path().join("toko_data_backup.csv").exists());
        assert!(!dir.path().join("toko_model_backup.json").exists());
    }

    #[test]
    fn test_put_without_model_drops_old_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path()).unwrap();

        let mut ds = dataset("sales", &[(1, 1.0)]);
        ds.model = Some(ModelArtifact::new(b"{}".to_vec()));
        store.put(&ds).unwrap();
        assert!(store.model_path(&ds.id).exists());

        ds.model = None;
        store.put(&ds).unwrap();
        assert!(!store.model_path(&ds.id).exists());
    }

    #[test]
    fn test_failed_model_write_keeps_previous_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path()).unwrap();
        let old = dataset("sales", &[(1, 1.0)]);
        store.put(&old).unwrap();

        // A directory where the model file belongs makes the model write fail.
        fs::create_dir(store.model_path(&old.id)).unwrap();
        fs::write(store.model_path(&old.id).join("blocker"), "x").unwrap();

        let mut new = dataset("sales", &[(1, 2.0), (2, 3.0)]);
        new.model = Some(ModelArtifact::new(b"{}".to_vec()));
        assert!(store.put(&new).is_err());

        let on_disk = fs::read(store.data_path(&old.id)).unwrap();
        assert_eq!(decode_series(&on_disk).unwrap(), old.series);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_purge_ignores_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();
        let mut store = FileStore::new(dir.path()).unwrap();
        store.put(&dataset("a", &[(1, 1.0)])).unwrap();

        assert_eq!(store.purge().unwrap(), 1);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_fractional_values_survive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path()).unwrap();
        let ds = dataset("precise", &[(1, 1234.5678), (2, 0.0)]);
        store.put(&ds).unwrap();
        assert_eq!(store.get(&ds.id).unwrap(), Some(ds));
    }

    #[test]
    fn test_corrupt_pointer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(ACTIVE_POINTER_FILE), "../escape").unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.active().is_err());
    }
}
