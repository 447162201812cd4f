use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::features::TemporalAlignment;
use crate::model::{ModelKind, ModelParams};
use crate::{ForecastError, Result};

pub const DEFAULT_BUNDLE_NAME: &str = "aqi_model";

/// Tunables for training and forecast generation.
///
/// Every field has a default so a config file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    pub model_kind: ModelKind,
    pub model_version: String,
    /// directory holding model bundles
    pub model_dir: PathBuf,
    pub bundle_name: String,
    /// days ahead of each row used as its training target
    pub training_horizon_days: usize,
    pub forecast_days: u32,
    pub max_forecast_days: u32,
    pub min_data_points: usize,
    /// history pulled per location when building its latest feature row
    pub lookback_days: i64,
    pub confidence_score: f64,
    /// locations used when a forecast request names none
    pub default_location_limit: usize,
    pub alignment: TemporalAlignment,
    pub model: ModelParams,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            model_kind: ModelKind::default(),
            model_version: crate::model::DEFAULT_MODEL_VERSION.to_string(),
            model_dir: PathBuf::from("./models"),
            bundle_name: DEFAULT_BUNDLE_NAME.to_string(),
            training_horizon_days: 1,
            forecast_days: 3,
            max_forecast_days: airq_core::MAX_FORECAST_DAYS,
            min_data_points: 100,
            lookback_days: 30,
            confidence_score: 0.8,
            default_location_limit: 10,
            alignment: TemporalAlignment::default(),
            model: ModelParams::default(),
        }
    }
}

impl ForecastSettings {
    /// Requested horizon bounded to `1..=max_forecast_days`.
    pub fn clamp_forecast_days(&self, requested: u32) -> u32 {
        requested.clamp(1, self.max_forecast_days.max(1))
    }

    /// Reject values no training or forecast run can work with.
    pub fn validate(&self) -> Result<()> {
        if self.training_horizon_days < 1 {
            return Err(ForecastError::InvalidSettings(String::from(
                "training_horizon_days must be at least 1, a row cannot be its own target",
            )));
        }
        if self.forecast_days < 1 || self.max_forecast_days < 1 {
            return Err(ForecastError::InvalidSettings(format!(
                "forecast_days ({}) and max_forecast_days ({}) must be at least 1",
                self.forecast_days, self.max_forecast_days
            )));
        }
        if self.lookback_days < 1 {
            return Err(ForecastError::InvalidSettings(format!(
                "lookback_days must be at least 1, got {}",
                self.lookback_days
            )));
        }
        let fraction = self.model.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(ForecastError::InvalidSettings(format!(
                "test_fraction must lie strictly between 0 and 1, got {}",
                fraction
            )));
        }
        Ok(())
    }
}
