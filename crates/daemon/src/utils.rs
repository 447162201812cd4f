use std::env;
use std::path::PathBuf;

use airq_core::{find_config_file, get_xdg_data_dir, load_config, ConfigSource, DEFAULT_RUN_INTERVAL};
use anyhow::anyhow;
use clap::Parser;
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};
use forecaster::{ForecastSettings, Location, ModelKind};
use log::LevelFilter;
use time::{format_description::well_known::Iso8601, OffsetDateTime};

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "AirQ Daemon - Trains the AQI model and generates forecasts on a schedule"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $AIRQ_DAEMON_CONFIG, ./daemon.toml,
    /// $XDG_CONFIG_HOME/airq/daemon.toml, /etc/airq/daemon.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "AIRQ_DAEMON_LEVEL")]
    pub level: Option<String>,

    /// Directory of dated observation parquet folders; forecast snapshots
    /// are written here too
    #[arg(short, long, env = "AIRQ_DAEMON_DATA_DIR")]
    pub data_dir: Option<String>,

    /// DuckDB file holding forecast records
    #[arg(short, long, env = "AIRQ_DAEMON_STORE")]
    pub store: Option<String>,

    /// Directory holding model bundles
    #[arg(short, long, env = "AIRQ_DAEMON_MODEL_DIR")]
    pub model_dir: Option<String>,

    /// Model family: linear, random_forest or sequence
    #[arg(short = 'k', long, env = "AIRQ_DAEMON_MODEL_KIND")]
    pub model_kind: Option<ModelKind>,

    /// Days ahead to forecast (1-7)
    #[arg(short, long, env = "AIRQ_DAEMON_FORECAST_DAYS")]
    pub forecast_days: Option<u32>,

    /// Seconds between forecast runs
    #[arg(short, long, env = "AIRQ_DAEMON_SLEEP_INTERVAL")]
    pub sleep_interval: Option<u64>,

    /// Location to forecast as City:State, repeatable; defaults to the
    /// locations found in the observation data
    #[arg(short = 'L', long = "location")]
    pub locations: Option<Vec<String>>,

    /// Train on generated sample history when stored observations are too few
    #[arg(long, env = "AIRQ_DAEMON_SAMPLE_FALLBACK")]
    pub sample_fallback: Option<bool>,

    /// Retrain at the start of every run instead of only when no model exists
    #[arg(long, env = "AIRQ_DAEMON_RETRAIN")]
    pub retrain: Option<bool>,

    /// Run a single cycle and exit
    #[arg(long)]
    #[serde(skip)]
    pub once: bool,

    /// Forecast tunables, only read from the config file's `[forecast]` table
    #[arg(skip)]
    pub forecast: Option<ForecastSettings>,
}

impl Cli {
    pub fn data_dir(&self) -> String {
        self.data_dir
            .clone()
            .unwrap_or_else(|| "./aqi_data".to_string())
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| get_xdg_data_dir().join("forecasts.duckdb"))
    }

    pub fn sleep_interval(&self) -> u64 {
        self.sleep_interval.unwrap_or(DEFAULT_RUN_INTERVAL)
    }

    pub fn sample_fallback(&self) -> bool {
        self.sample_fallback.unwrap_or(false)
    }

    pub fn retrain(&self) -> bool {
        self.retrain.unwrap_or(false)
    }

    /// Settings from the config file with command line overrides applied.
    pub fn forecast_settings(&self) -> ForecastSettings {
        let mut settings = self.forecast.clone().unwrap_or_default();
        if let Some(dir) = &self.model_dir {
            settings.model_dir = PathBuf::from(dir);
        }
        if let Some(kind) = self.model_kind {
            settings.model_kind = kind;
        }
        if let Some(days) = self.forecast_days {
            settings.forecast_days = days;
        }
        settings
    }

    /// Explicitly requested locations, `None` when the data should decide.
    pub fn locations(&self) -> anyhow::Result<Option<Vec<Location>>> {
        self.locations
            .as_ref()
            .map(|raw| raw.iter().map(|l| parse_location(l)).collect())
            .transpose()
    }
}

pub fn parse_location(raw: &str) -> anyhow::Result<Location> {
    let (city, state) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("location '{}' is not in City:State form", raw))?;
    let (city, state) = (city.trim(), state.trim());
    if city.is_empty() || state.is_empty() {
        return Err(anyhow!("location '{}' is missing a city or state", raw));
    }
    Ok(Location::new(city, state))
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> Cli {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file("AIRQ_DAEMON_CONFIG", "daemon.toml")
    };

    if let Some(path) = source.path() {
        log::info!("Loading config from: {}", path.display());
    }

    let file_config: Cli = load_config(&source).unwrap_or_default();
    merge(cli_args, file_config)
}

/// CLI args override file config (env vars are handled by clap)
fn merge(cli_args: Cli, file_config: Cli) -> Cli {
    Cli {
        config: cli_args.config,
        level: cli_args.level.or(file_config.level),
        data_dir: cli_args.data_dir.or(file_config.data_dir),
        store: cli_args.store.or(file_config.store),
        model_dir: cli_args.model_dir.or(file_config.model_dir),
        model_kind: cli_args.model_kind.or(file_config.model_kind),
        forecast_days: cli_args.forecast_days.or(file_config.forecast_days),
        sleep_interval: cli_args.sleep_interval.or(file_config.sleep_interval),
        locations: cli_args.locations.or(file_config.locations),
        sample_fallback: cli_args.sample_fallback.or(file_config.sample_fallback),
        retrain: cli_args.retrain.or(file_config.retrain),
        once: cli_args.once,
        forecast: file_config.forecast,
    }
}

pub fn get_log_level(cli: &Cli) -> LevelFilter {
    let level_str = cli
        .level
        .clone()
        .or_else(|| env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    match level_str.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

pub fn setup_logger() -> Dispatch {
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            let now = OffsetDateTime::now_utc()
                .format(&Iso8601::DEFAULT)
                .unwrap_or_default();
            out.finish(format_args!(
                "[{} {}] {}: {}",
                now,
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .chain(std::io::stdout())
}
