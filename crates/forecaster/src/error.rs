use crate::db::file_access;

#[derive(thiserror::Error, Debug)]
pub enum ForecastError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    #[error("Model must be trained before {0}")]
    UntrainedModel(String),
    #[error("No recent data available for {city}, {state}")]
    NoRecentData { city: String, state: String },
    #[error("Unsupported pollutant: {0}")]
    UnsupportedPollutant(String),
    #[error("Could not parse timestamp: {0}")]
    MalformedTimestamp(String),
    #[error("Feature mismatch: {0}")]
    FeatureMismatch(String),
    #[error("Feature importance is not available for {0} models")]
    NoFeatureImportance(String),
    #[error("Model fitting failed: {0}")]
    Fit(String),
    #[error("Invalid forecast settings: {0}")]
    InvalidSettings(String),
    #[error("Invalid model bundle: {0}")]
    Bundle(String),
    #[error("Forecast store failure: {0}")]
    Store(String),
    #[error("Unexpected observation schema: {0}")]
    Schema(String),
    #[error("Failed to query duckdb: {0}")]
    Query(#[from] duckdb::Error),
    #[error("Failed to access observation files: {0}")]
    FileAccess(#[from] file_access::Error),
    #[error("Invalid query pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Failed to write parquet: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Failed to format time string: {0}")]
    TimeFormat(#[from] time::error::Format),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;
