use std::fs;
use std::path::Path;
use std::sync::Arc;

use forecaster::db::{
    write_forecasts, DataKind, DuckDbForecastStore, FileAccess, FileParams,
    ParquetObservationSource,
};
use forecaster::{
    ForecastError, ForecastStore, Location, MemoryForecastStore, MemoryObservationSource,
    ModelKind, PredictionInput, ServiceResponse, DEFAULT_BUNDLE_NAME,
};
use time::macros::{date, datetime};

use crate::helpers::{sample_history, settings, spawn_service, write_snapshot};

#[test]
fn train_forecast_and_export_from_parquet() {
    let data_dir = tempfile::tempdir().unwrap();
    let model_dir = tempfile::tempdir().unwrap();
    let access = FileAccess::new(data_dir.path());
    write_snapshot(&access, &sample_history(60), datetime!(2024-10-15 00:30:00 UTC));

    let source = Arc::new(ParquetObservationSource::new(access.clone()));
    let store = Arc::new(DuckDbForecastStore::open(&data_dir.path().join("forecasts.duckdb")).unwrap());
    let service = spawn_service(
        settings(model_dir.path(), ModelKind::RandomForest),
        source,
        store.clone(),
    );

    let report = service.train_model(100).unwrap();
    assert!(report.metrics.rmse.is_finite());
    assert!(report.feature_count > 0);

    let first = service.generate_forecasts(None, 3).unwrap();
    let second = service.generate_forecasts(None, 3).unwrap();
    assert_eq!(first.forecasts_created, 9);
    assert_eq!(second.forecasts_created, 9);
    assert!(second.errors.is_empty());

    let records = store.list(None).unwrap();
    assert_eq!(records.len(), 9);
    assert_eq!(
        records[0].forecast_date,
        date!(2024 - 10 - 16),
        "earliest forecast is tomorrow"
    );

    let export = access
        .new_file_path(DataKind::Forecasts, datetime!(2024-10-15 01:00:00 UTC))
        .unwrap();
    assert_eq!(write_forecasts(&export, &records).unwrap(), 9);
    let exported = access
        .grab_file_paths(&FileParams {
            kind: Some(DataKind::Forecasts),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(exported.len(), 1);
}

#[test]
fn failed_retraining_keeps_the_previous_bundle() {
    let model_dir = tempfile::tempdir().unwrap();
    let data = sample_history(90);
    let source = Arc::new(MemoryObservationSource::new(data.pollutants, data.weather));
    let service = spawn_service(
        settings(model_dir.path(), ModelKind::Linear),
        source.clone(),
        Arc::new(MemoryForecastStore::new()),
    );
    service.train_model(100).unwrap();
    let delhi = PredictionInput::Location(Location::new("Delhi", "Delhi"));
    let before = service.predict_one(delhi.clone()).unwrap();

    let err = service.train_model(10_000).unwrap_err();
    assert!(matches!(err, ForecastError::InsufficientData(_)));
    assert_eq!(service.predict_one(delhi.clone()).unwrap(), before);

    let restarted = spawn_service(
        settings(model_dir.path(), ModelKind::Linear),
        source,
        Arc::new(MemoryForecastStore::new()),
    );
    assert!(restarted.load_existing().unwrap());
    approx::assert_relative_eq!(restarted.predict_one(delhi).unwrap(), before, epsilon = 1e-9);
}

#[test]
fn bundle_write_failure_keeps_the_previous_bundle() {
    let model_dir = tempfile::tempdir().unwrap();
    let data = sample_history(90);
    let source = Arc::new(MemoryObservationSource::new(data.pollutants, data.weather));
    let service = spawn_service(
        settings(model_dir.path(), ModelKind::Linear),
        source.clone(),
        Arc::new(MemoryForecastStore::new()),
    );
    service.train_model(100).unwrap();
    let delhi = PredictionInput::Location(Location::new("Delhi", "Delhi"));
    let before = service.predict_one(delhi.clone()).unwrap();

    let metadata = model_dir
        .path()
        .join(format!("{}_metadata.json", DEFAULT_BUNDLE_NAME));
    let blocker = airq_core::staging_path(&metadata);
    fs::create_dir(&blocker).unwrap();
    let entries_before = dir_entries(model_dir.path());

    let err = service.train_model(100).unwrap_err();
    assert!(matches!(err, ForecastError::Io(_)));
    assert_eq!(service.predict_one(delhi.clone()).unwrap(), before);
    assert_eq!(dir_entries(model_dir.path()), entries_before);

    let restarted = spawn_service(
        settings(model_dir.path(), ModelKind::Linear),
        source,
        Arc::new(MemoryForecastStore::new()),
    );
    assert!(restarted.load_existing().unwrap());
    approx::assert_relative_eq!(restarted.predict_one(delhi).unwrap(), before, epsilon = 1e-9);
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn sequence_model_forecasts_are_non_negative() {
    let model_dir = tempfile::tempdir().unwrap();
    let data = sample_history(45);
    let source = Arc::new(MemoryObservationSource::new(data.pollutants, data.weather));
    let store = Arc::new(MemoryForecastStore::new());
    let service = spawn_service(
        settings(model_dir.path(), ModelKind::Sequence),
        source,
        store.clone(),
    );
    service.train_with_sample_data().unwrap();
    assert_eq!(
        service.model_info().unwrap().model_kind,
        Some(ModelKind::Sequence)
    );

    let batch = service.generate_forecasts(None, 2).unwrap();
    assert_eq!(batch.forecasts_created, 6);
    assert!(store
        .list(None)
        .unwrap()
        .iter()
        .all(|r| r.predicted_category == forecaster::AqiCategory::from_aqi(r.predicted_aqi)));
}

#[test]
fn responses_carry_errors_as_messages() {
    let model_dir = tempfile::tempdir().unwrap();
    let service = spawn_service(
        settings(model_dir.path(), ModelKind::Linear),
        Arc::new(MemoryObservationSource::default()),
        Arc::new(MemoryForecastStore::new()),
    );

    let response: ServiceResponse<_> = service.generate_forecasts(None, 3).into();
    assert!(!response.success);
    assert!(response.error.unwrap().contains("Model must be trained"));

    let response: ServiceResponse<_> = service.train_model(100).into();
    assert!(!response.success);
    assert!(response.error.unwrap().starts_with("Insufficient data"));
}
