use std::path::Path;
use std::sync::Arc;

use forecaster::db::{write_pollutants, write_weather, DataKind, FileAccess};
use forecaster::sample::{SampleData, SampleGenerator};
use forecaster::{
    FixedClock, ForecastService, ForecastSettings, ForecastStore, ModelKind, ObservationSource,
};
use time::macros::date;
use time::{Date, OffsetDateTime};

pub const TODAY: Date = date!(2024 - 10 - 15);

pub fn sample_history(days: u32) -> SampleData {
    SampleGenerator::ending_before(TODAY, days).generate()
}

/// Write `data` as one pollutant and one weather file generated at `at`.
pub fn write_snapshot(access: &FileAccess, data: &SampleData, at: OffsetDateTime) {
    let pollutant_path = access.new_file_path(DataKind::Pollutants, at).unwrap();
    write_pollutants(&pollutant_path, &data.pollutants).unwrap();
    let weather_path = access.new_file_path(DataKind::Weather, at).unwrap();
    write_weather(&weather_path, &data.weather).unwrap();
}

pub fn settings(model_dir: &Path, kind: ModelKind) -> ForecastSettings {
    let mut settings = ForecastSettings {
        model_kind: kind,
        model_dir: model_dir.to_path_buf(),
        ..Default::default()
    };
    settings.model.forest.n_trees = 10;
    settings.model.sequence.epochs = 5;
    settings
}

pub fn spawn_service(
    settings: ForecastSettings,
    source: Arc<dyn ObservationSource>,
    store: Arc<dyn ForecastStore>,
) -> ForecastService {
    ForecastService::new(settings, source, store).with_clock(Arc::new(FixedClock(TODAY)))
}
