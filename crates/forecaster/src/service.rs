//! The forecasting service: owns the current model and ties observation
//! retrieval, training and forecast persistence together.
//!
//! Lifecycle is explicit: construct, optionally [`ForecastService::load_existing`],
//! then train and forecast. A training run replaces the model only after its
//! bundle has been written; forecasting always works on a shared read-only
//! handle to whichever model was current when the batch started.

use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime};

use crate::config::ForecastSettings;
use crate::dataset::build_training_set;
use crate::features::{latest_row, FeatureBuilder, FeatureRow};
use crate::model::{ForecastModel, Metrics, ModelKind};
use crate::sample::{SampleGenerator, DEFAULT_SAMPLE_DAYS};
use crate::source::{ObservationQuery, ObservationSource};
use crate::store::ForecastStore;
use crate::{
    AqiCategory, ForecastError, ForecastRecord, Location, PollutantObservation, Result,
    WeatherObservation,
};

/// Source of "today" for forecast dates and lookback windows.
pub trait Clock: Send + Sync {
    fn today(&self) -> Date;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> Date {
        OffsetDateTime::now_utc().date()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Date);

impl Clock for FixedClock {
    fn today(&self) -> Date {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub metrics: Metrics,
    pub training_records: usize,
    pub feature_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastBatch {
    pub forecasts_created: usize,
    pub locations_processed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub is_loaded: bool,
    pub model_kind: Option<ModelKind>,
    pub model_version: Option<String>,
    pub feature_count: usize,
    pub feature_columns: Vec<String>,
    pub metrics: Option<Metrics>,
}

/// Input for a single prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionInput {
    /// a vector already laid out in the model's feature order
    Features(Vec<f64>),
    /// look up the latest feature row for this location
    Location(Location),
}

pub struct ForecastService {
    settings: ForecastSettings,
    source: Arc<dyn ObservationSource>,
    store: Arc<dyn ForecastStore>,
    clock: Arc<dyn Clock>,
    model: RwLock<Option<Arc<ForecastModel>>>,
    training: Mutex<()>,
}

impl ForecastService {
    pub fn new(
        settings: ForecastSettings,
        source: Arc<dyn ObservationSource>,
        store: Arc<dyn ForecastStore>,
    ) -> Self {
        Self {
            settings,
            source,
            store,
            clock: Arc::new(SystemClock),
            model: RwLock::new(None),
            training: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn ForecastStore> {
        &self.store
    }

    /// The model forecasts are currently generated with.
    pub fn current_model(&self) -> Result<Option<Arc<ForecastModel>>> {
        Ok(self.model.read().map_err(poisoned)?.clone())
    }

    fn require_model(&self) -> Result<Arc<ForecastModel>> {
        self.current_model()?
            .ok_or_else(|| ForecastError::UntrainedModel(String::from("generating forecasts")))
    }

    fn replace_model(&self, model: ForecastModel) -> Result<()> {
        *self.model.write().map_err(poisoned)? = Some(Arc::new(model));
        Ok(())
    }

    /// Load the configured bundle if one exists; `false` means there was
    /// nothing to load.
    pub fn load_existing(&self) -> Result<bool> {
        let dir = &self.settings.model_dir;
        match ForecastModel::load(dir, &self.settings.bundle_name, self.settings.model) {
            Ok(model) => {
                info!(
                    "loaded {} model {} from {}",
                    model.kind(),
                    model.version(),
                    dir.display()
                );
                self.replace_model(model)?;
                Ok(true)
            }
            Err(ForecastError::UntrainedModel(_)) => {
                info!("no existing model in {}, one must be trained", dir.display());
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Train on every stored observation.
    ///
    /// Both observation kinds must have at least `min_data_points` records,
    /// and so must the feature rows built from them.
    pub fn train_model(&self, min_data_points: usize) -> Result<TrainingReport> {
        let query = ObservationQuery::all();
        let pollutants = self.source.pollutant_observations(&query)?;
        let weather = self.source.weather_observations(&query)?;
        if pollutants.len() < min_data_points || weather.len() < min_data_points {
            warn!(
                "insufficient data for training: {} pollutant, {} weather records",
                pollutants.len(),
                weather.len()
            );
            return Err(ForecastError::InsufficientData(format!(
                "need at least {} records each, have {} pollutant and {} weather",
                min_data_points,
                pollutants.len(),
                weather.len()
            )));
        }
        self.train_on(&pollutants, &weather, min_data_points)
    }

    /// Train on generated history ending yesterday.
    pub fn train_with_sample_data(&self) -> Result<TrainingReport> {
        let sample = SampleGenerator::ending_before(self.clock.today(), DEFAULT_SAMPLE_DAYS)
            .with_seed(self.settings.model.seed)
            .generate();
        info!(
            "training on {} generated pollutant and {} weather records",
            sample.pollutants.len(),
            sample.weather.len()
        );
        self.train_on(&sample.pollutants, &sample.weather, 0)
    }

    fn train_on(
        &self,
        pollutants: &[PollutantObservation],
        weather: &[WeatherObservation],
        min_rows: usize,
    ) -> Result<TrainingReport> {
        self.settings.validate()?;
        let rows = FeatureBuilder::new(self.settings.alignment).build(pollutants, weather);
        if rows.len() < min_rows {
            warn!("insufficient combined data after feature preparation: {}", rows.len());
            return Err(ForecastError::InsufficientData(format!(
                "{} feature rows after preparation, need {}",
                rows.len(),
                min_rows
            )));
        }
        let set = build_training_set(
            &rows,
            self.settings.training_horizon_days,
            self.settings.alignment,
        )?;

        let _training = self.training.lock().map_err(poisoned)?;
        let mut model = ForecastModel::new(self.settings.model_kind, self.settings.model)
            .with_version(self.settings.model_version.clone());
        let metrics = model.fit(&set)?;
        model.save(&self.settings.model_dir, &self.settings.bundle_name)?;

        let report = TrainingReport {
            metrics,
            training_records: set.len(),
            feature_count: set.schema.len(),
        };
        self.replace_model(model)?;
        Ok(report)
    }

    /// Predict `forecast_days` days ahead for each location and upsert the
    /// results.
    ///
    /// Every horizon day is predicted from the same latest feature row.
    /// A location that fails is reported in `errors` and does not stop the
    /// others. Without `locations`, the source's known locations are used.
    pub fn generate_forecasts(
        &self,
        locations: Option<&[Location]>,
        forecast_days: u32,
    ) -> Result<ForecastBatch> {
        let model = self.require_model()?;
        let days = self.settings.clamp_forecast_days(forecast_days);
        let locations: Vec<Location> = match locations {
            Some(locations) => locations.to_vec(),
            None => self
                .source
                .locations()?
                .into_iter()
                .take(self.settings.default_location_limit)
                .collect(),
        };
        info!(
            "generating forecasts for {} locations, {} days ahead",
            locations.len(),
            days
        );

        let today = self.clock.today();
        let mut batch = ForecastBatch {
            locations_processed: locations.len(),
            ..Default::default()
        };
        for location in &locations {
            match self.forecast_location(&model, location, today, days) {
                Ok(created) => batch.forecasts_created += created,
                Err(e) => {
                    let message = match e {
                        ForecastError::NoRecentData { .. } => e.to_string(),
                        other => format!("Error generating forecast for {}: {}", location, other),
                    };
                    warn!("{}", message);
                    batch.errors.push(message);
                }
            }
        }
        info!(
            "generated {} forecasts ({} locations failed)",
            batch.forecasts_created,
            batch.errors.len()
        );
        Ok(batch)
    }

    fn forecast_location(
        &self,
        model: &ForecastModel,
        location: &Location,
        today: Date,
        days: u32,
    ) -> Result<usize> {
        let row = self.recent_features(location, today)?;
        let predicted = model.predict_row(&row)?;
        let predicted_aqi = predicted.max(0.0) as u32;
        debug!("{} latest row {} predicts {}", location, row.date, predicted_aqi);

        let mut created = 0;
        for offset in 1..=days {
            self.store.upsert(ForecastRecord {
                location: row.location.clone(),
                latitude: row.latitude,
                longitude: row.longitude,
                forecast_date: today + Duration::days(i64::from(offset)),
                predicted_aqi,
                predicted_category: AqiCategory::from_aqi(predicted_aqi),
                confidence_score: self.settings.confidence_score,
                model_version: model.version().to_string(),
            })?;
            created += 1;
        }
        Ok(created)
    }

    /// Latest feature row built from the lookback window before `today`.
    fn recent_features(&self, location: &Location, today: Date) -> Result<FeatureRow> {
        let since = (today - Duration::days(self.settings.lookback_days)).midnight();
        let query = ObservationQuery::for_location(location.clone(), since);
        let pollutants = self.source.pollutant_observations(&query)?;
        let weather = self.source.weather_observations(&query)?;
        let rows = FeatureBuilder::new(self.settings.alignment).build(&pollutants, &weather);
        latest_row(&rows, location)
            .cloned()
            .ok_or_else(|| ForecastError::NoRecentData {
                city: location.city.clone(),
                state: location.state.clone(),
            })
    }

    /// Single non-negative AQI prediction.
    pub fn predict_one(&self, input: PredictionInput) -> Result<f64> {
        let model = self
            .current_model()?
            .ok_or_else(|| ForecastError::UntrainedModel(String::from("prediction")))?;
        match input {
            PredictionInput::Features(features) => model.predict_vector(&features),
            PredictionInput::Location(location) => {
                let row = self.recent_features(&location, self.clock.today())?;
                model.predict_row(&row)
            }
        }
    }

    pub fn model_info(&self) -> Result<ModelInfo> {
        let model = self.current_model()?;
        let feature_columns = model
            .as_ref()
            .and_then(|m| m.schema())
            .map(|s| s.names())
            .unwrap_or_default();
        Ok(ModelInfo {
            is_loaded: model.is_some(),
            model_kind: model.as_ref().map(|m| m.kind()),
            model_version: model.as_ref().map(|m| m.version().to_string()),
            feature_count: feature_columns.len(),
            feature_columns,
            metrics: model.as_ref().and_then(|m| m.metrics()),
        })
    }

    pub fn feature_importance(&self) -> Result<Vec<(String, f64)>> {
        let model = self
            .current_model()?
            .ok_or_else(|| ForecastError::UntrainedModel(String::from("feature importance")))?;
        model
            .feature_importance()?
            .ok_or_else(|| ForecastError::NoFeatureImportance(model.kind().to_string()))
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> ForecastError {
    ForecastError::Store(format!("model lock poisoned: {}", e))
}
