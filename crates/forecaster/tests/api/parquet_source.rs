use forecaster::db::{write_pollutants, DataKind, FileAccess, ParquetObservationSource};
use forecaster::{Location, ObservationQuery, ObservationSource, PollutantObservation};
use time::macros::datetime;

use crate::helpers::{sample_history, write_snapshot};

fn by_location_and_time(mut observations: Vec<PollutantObservation>) -> Vec<PollutantObservation> {
    observations.sort_by(|a, b| (&a.location, a.observed_at).cmp(&(&b.location, b.observed_at)));
    observations
}

#[test]
fn reads_back_what_was_written() {
    let dir = tempfile::tempdir().unwrap();
    let access = FileAccess::new(dir.path());
    let data = sample_history(20);
    write_snapshot(&access, &data, datetime!(2024-10-15 06:00:00 UTC));

    let source = ParquetObservationSource::new(access);
    let pollutants = source.pollutant_observations(&ObservationQuery::all()).unwrap();
    assert_eq!(pollutants, by_location_and_time(data.pollutants.clone()));

    let weather = source.weather_observations(&ObservationQuery::all()).unwrap();
    assert_eq!(weather.len(), data.weather.len());
    assert!(weather.iter().all(|w| w.temperature.is_some()));
}

#[test]
fn filters_by_location_and_since() {
    let dir = tempfile::tempdir().unwrap();
    let access = FileAccess::new(dir.path());
    let data = sample_history(20);
    write_snapshot(&access, &data, datetime!(2024-10-15 06:00:00 UTC));
    let source = ParquetObservationSource::new(access);

    let query = ObservationQuery::for_location(
        Location::new("mumbai", "MAHARASHTRA"),
        datetime!(2024-10-10 00:00:00),
    );
    let pollutants = source.pollutant_observations(&query).unwrap();
    // 10th through 14th
    assert_eq!(pollutants.len(), 5);
    assert!(pollutants.iter().all(|p| p.location.city == "Mumbai"));
    assert!(pollutants
        .iter()
        .all(|p| p.observed_at >= datetime!(2024-10-10 00:00:00)));

    let weather = source.weather_observations(&query).unwrap();
    assert_eq!(weather.len(), 5);
}

#[test]
fn spans_every_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let access = FileAccess::new(dir.path());
    let data = sample_history(30);
    let (older, newer) = data.pollutants.split_at(45);
    let mut first = data.clone();
    first.pollutants = older.to_vec();
    write_snapshot(&access, &first, datetime!(2024-10-14 06:00:00 UTC));
    let later = access
        .new_file_path(DataKind::Pollutants, datetime!(2024-10-15 06:00:00 UTC))
        .unwrap();
    write_pollutants(&later, newer).unwrap();

    let source = ParquetObservationSource::new(access);
    let pollutants = source.pollutant_observations(&ObservationQuery::all()).unwrap();
    assert_eq!(pollutants.len(), 90);

    let cities: Vec<String> = source
        .locations()
        .unwrap()
        .into_iter()
        .map(|l| l.city)
        .collect();
    assert_eq!(cities, vec!["Bangalore", "Delhi", "Mumbai"]);
}

#[test]
fn empty_directory_has_no_observations() {
    let dir = tempfile::tempdir().unwrap();
    let source = ParquetObservationSource::new(FileAccess::new(dir.path()));
    assert!(source
        .pollutant_observations(&ObservationQuery::all())
        .unwrap()
        .is_empty());
    assert!(source.locations().unwrap().is_empty());
}
