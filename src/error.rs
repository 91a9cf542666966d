use thiserror::Error;

#[derive(Error, Debug)]
pub enum RevfluxError {
    #[error("Required column '{0}' not found in upload")]
    MissingColumn(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Invalid value {value} at {period}: revenue must be a non-negative finite number")]
    InvalidValue { period: String, value: f64 },

    #[error("Invalid series: {0}")]
    InvalidSeries(String),

    #[error("Insufficient history: {required} observations required, got {actual}")]
    InsufficientHistory { required: usize, actual: usize },

    #[error("Estimator did not converge after {iterations} iterations")]
    NonConvergence { iterations: usize },

    #[error("Numerical failure during estimation: {0}")]
    NumericalFailure(String),

    #[error("Invalid horizon {horizon}: {reason}")]
    InvalidHorizon { horizon: usize, reason: String },

    #[error("Invalid tail length {length}: must be between {min} and {max}")]
    InvalidTailLength { length: usize, min: usize, max: usize },

    #[error("No active dataset")]
    NoActiveDataset,

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("No trained model for dataset: {0}")]
    ModelNotTrained(String),

    #[error("Backup not found for dataset: {0}")]
    BackupNotFound(String),

    #[error("No active dataset or backup available to restore")]
    NothingToRestore,

    #[error("Chart rendering failed: {0}")]
    Render(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[cfg(feature = "xlsx")]
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl RevfluxError {
    /// True for failures raised while fitting a model.
    pub fn is_fit_error(&self) -> bool {
        matches!(
            self,
            RevfluxError::InsufficientHistory { .. }
                | RevfluxError::NonConvergence { .. }
                | RevfluxError::NumericalFailure(_)
                | RevfluxError::InvalidValue { .. }
        )
    }

    pub fn is_schema_error(&self) -> bool {
        matches!(self, RevfluxError::MissingColumn(_))
    }
}

pub type Result<T> = std::result::Result<T, RevfluxError>;
