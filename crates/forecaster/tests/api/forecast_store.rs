use std::sync::Arc;
use std::thread;

use forecaster::db::DuckDbForecastStore;
use forecaster::{AqiCategory, ForecastRecord, ForecastStore, Location, UpsertOutcome};
use time::macros::date;

fn record(aqi: u32, version: String) -> ForecastRecord {
    ForecastRecord {
        location: Location::new("Chennai", "Tamil Nadu"),
        latitude: Some(13.08),
        longitude: Some(80.27),
        forecast_date: date!(2024 - 11 - 20),
        predicted_aqi: aqi,
        predicted_category: AqiCategory::from_aqi(aqi),
        confidence_score: 0.8,
        model_version: version,
    }
}

#[test]
fn concurrent_writers_of_one_key_leave_one_whole_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DuckDbForecastStore::open(&dir.path().join("forecasts.duckdb")).unwrap());

    let handles: Vec<_> = (0..6u32)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.upsert(record(60 * i, format!("v{}", i))).unwrap())
        })
        .collect();
    let outcomes: Vec<UpsertOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == UpsertOutcome::Inserted)
            .count(),
        1
    );
    let stored = store.list(None).unwrap();
    assert_eq!(stored.len(), 1);
    let i = stored[0].predicted_aqi / 60;
    assert_eq!(stored[0].model_version, format!("v{}", i));
    assert_eq!(stored[0].predicted_category, AqiCategory::from_aqi(60 * i));
}
