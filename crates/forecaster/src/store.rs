//! Forecast records keyed by (city, state, forecast date) with upsert
//! semantics.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{AqiCategory, ForecastError, Location, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub location: Location,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub forecast_date: Date,
    pub predicted_aqi: u32,
    pub predicted_category: AqiCategory,
    pub confidence_score: f64,
    pub model_version: String,
}

impl ForecastRecord {
    pub fn key(&self) -> ForecastKey {
        ForecastKey {
            location: self.location.clone(),
            forecast_date: self.forecast_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForecastKey {
    pub location: Location,
    pub forecast_date: Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Persistence for forecast records.
///
/// `upsert` on an existing key overwrites every non-key field in place. Concurrent upserts of one key are serialized so
/// the last write wins whole.
pub trait ForecastStore: Send + Sync {
    fn upsert(&self, record: ForecastRecord) -> Result<UpsertOutcome>;

    fn get(&self, location: &Location, forecast_date: Date) -> Result<Option<ForecastRecord>>;

    /// Records ordered by (city, state, date), optionally for one location.
    fn list(&self, location: Option<&Location>) -> Result<Vec<ForecastRecord>>;
}

#[derive(Default)]
pub struct MemoryForecastStore {
    records: Mutex<BTreeMap<ForecastKey, ForecastRecord>>,
}

impl MemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<ForecastKey, ForecastRecord>>> {
        self.records
            .lock()
            .map_err(|e| ForecastError::Store(format!("forecast store lock poisoned: {}", e)))
    }
}

impl ForecastStore for MemoryForecastStore {
    fn upsert(&self, record: ForecastRecord) -> Result<UpsertOutcome> {
        let mut records = self.lock()?;
        match records.insert(record.key(), record) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Inserted),
        }
    }

    fn get(&self, location: &Location, forecast_date: Date) -> Result<Option<ForecastRecord>> {
        let key = ForecastKey {
            location: location.clone(),
            forecast_date,
        };
        Ok(self.lock()?.get(&key).cloned())
    }

    fn list(&self, location: Option<&Location>) -> Result<Vec<ForecastRecord>> {
        Ok(self
            .lock()?
            .values()
            .filter(|r| location.map_or(true, |l| r.location.matches(l)))
            .cloned()
            .collect())
    }
}
