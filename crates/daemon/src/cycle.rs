use anyhow::Context;
use forecaster::db::{write_forecasts, DataKind, FileAccess};
use forecaster::{ForecastBatch, ForecastError, ForecastService, Location};
use log::{debug, info, warn};
use time::OffsetDateTime;

/// What one scheduled run does besides forecasting.
#[derive(Debug, Clone, Default)]
pub struct CycleOptions {
    pub locations: Option<Vec<Location>>,
    pub min_data_points: usize,
    pub sample_fallback: bool,
    pub retrain: bool,
}

/// Train if needed, forecast, then export the upcoming forecasts as a
/// parquet snapshot under the data directory.
pub fn forecast_cycle(
    service: &ForecastService,
    file_access: &FileAccess,
    options: &CycleOptions,
) -> anyhow::Result<ForecastBatch> {
    if options.retrain || service.current_model()?.is_none() {
        train(service, options)?;
    }

    let days = service.settings().forecast_days;
    let batch = service.generate_forecasts(options.locations.as_deref(), days)?;

    let now = OffsetDateTime::now_utc();
    let today = now.date();
    let upcoming: Vec<_> = service
        .store()
        .list(None)?
        .into_iter()
        .filter(|r| r.forecast_date > today)
        .collect();
    if upcoming.is_empty() {
        debug!("no upcoming forecasts to export");
        return Ok(batch);
    }
    let path = file_access.new_file_path(DataKind::Forecasts, now)?;
    write_forecasts(&path, &upcoming)
        .with_context(|| format!("writing forecast snapshot {}", path.display()))?;
    Ok(batch)
}

fn train(service: &ForecastService, options: &CycleOptions) -> anyhow::Result<()> {
    match service.train_model(options.min_data_points) {
        Ok(report) => {
            info!(
                "trained on {} examples with {} features",
                report.training_records, report.feature_count
            );
            Ok(())
        }
        Err(ForecastError::InsufficientData(reason)) if options.sample_fallback => {
            warn!("{}, training on sample data instead", reason);
            let report = service.train_with_sample_data()?;
            info!("trained on {} sample examples", report.training_records);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
