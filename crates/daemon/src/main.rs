use std::{sync::Arc, time::Duration};

use airq_core::create_dir_all;
use daemon::{forecast_cycle, get_config_info, get_log_level, setup_logger, CycleOptions};
use forecaster::db::{DuckDbForecastStore, FileAccess, ParquetObservationSource};
use forecaster::ForecastService;
use log::{error, info, warn};
use tokio::{signal, time::interval};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = get_config_info();
    let log_level = get_log_level(&cli);

    setup_logger()
        .level(log_level)
        .level_for("duckdb", log_level)
        .level_for("forecaster", log_level)
        .level_for("daemon", log_level)
        .level_for("airq_daemon", log_level)
        .apply()?;

    let data_dir = cli.data_dir();
    let store_path = cli.store_path();
    let settings = cli.forecast_settings();
    settings.validate()?;
    create_dir_all(&data_dir)?;

    info!("AirQ Daemon starting...");
    info!("  Data dir: {}", data_dir);
    info!("  Forecast store: {}", store_path.display());
    info!(
        "  Model: {} in {}",
        settings.model_kind,
        settings.model_dir.display()
    );
    info!("  Run interval: {} seconds", cli.sleep_interval());

    let file_access = FileAccess::new(&data_dir);
    let source = Arc::new(ParquetObservationSource::new(file_access.clone()));
    let store = Arc::new(DuckDbForecastStore::open(&store_path)?);
    let options = CycleOptions {
        locations: cli.locations()?,
        min_data_points: settings.min_data_points,
        sample_fallback: cli.sample_fallback(),
        retrain: cli.retrain(),
    };
    let service = Arc::new(ForecastService::new(settings, source, store));
    match service.load_existing() {
        Ok(true) => {}
        Ok(false) => info!("model will be trained on the first run"),
        Err(e) => warn!("existing model could not be loaded, retraining: {}", e),
    }

    if cli.once {
        run(service, file_access, options).await?;
        return Ok(());
    }

    let sleep_between_runs = cli.sleep_interval();
    let mut run_interval = interval(Duration::from_secs(sleep_between_runs));
    loop {
        tokio::select! {
            _ = run_interval.tick() => {
                match run(service.clone(), file_access.clone(), options.clone()).await {
                    Ok(_) => info!("Finished forecast run, waiting {} seconds for next run", sleep_between_runs),
                    Err(err) => error!("Error running forecasts: {}", err),
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// One cycle on the blocking pool; training and duckdb work are synchronous.
async fn run(
    service: Arc<ForecastService>,
    file_access: FileAccess,
    options: CycleOptions,
) -> anyhow::Result<()> {
    let batch =
        tokio::task::spawn_blocking(move || forecast_cycle(&service, &file_access, &options))
            .await??;
    info!(
        "created {} forecasts for {} locations ({} errors)",
        batch.forecasts_created,
        batch.locations_processed,
        batch.errors.len()
    );
    Ok(())
}
