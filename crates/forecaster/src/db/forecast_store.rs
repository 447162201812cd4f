use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use duckdb::{params, Connection, OptionalExt, Row};
use log::{debug, info};
use time::{macros::format_description, Date};

use crate::store::{ForecastStore, UpsertOutcome};
use crate::{AqiCategory, ForecastError, ForecastRecord, Location, Result};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS aqi_forecast (
    city VARCHAR NOT NULL,
    state VARCHAR NOT NULL,
    forecast_date DATE NOT NULL,
    predicted_aqi BIGINT NOT NULL,
    predicted_category VARCHAR NOT NULL,
    confidence_score DOUBLE NOT NULL,
    model_version VARCHAR NOT NULL,
    latitude DOUBLE,
    longitude DOUBLE,
    PRIMARY KEY (city, state, forecast_date)
);
ALTER TABLE aqi_forecast ADD COLUMN IF NOT EXISTS latitude DOUBLE;
ALTER TABLE aqi_forecast ADD COLUMN IF NOT EXISTS longitude DOUBLE;";

const SELECT_COLUMNS: &str = "SELECT city, state, CAST(forecast_date AS VARCHAR), predicted_aqi,
    predicted_category, confidence_score, model_version, latitude, longitude FROM aqi_forecast";

/// Forecast table in a duckdb database file.
///
/// The connection sits behind a mutex, so the existence check and the write
/// of one upsert happen as a unit.
pub struct DuckDbForecastStore {
    conn: Mutex<Connection>,
}

impl DuckDbForecastStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            airq_core::create_dir_all(parent)?;
        }
        info!("opening forecast store at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLE)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ForecastError::Store(format!("forecast store lock poisoned: {}", e)))
    }
}

/// Columns as produced by `SELECT_COLUMNS`, category and date still raw.
struct StoredRow {
    city: String,
    state: String,
    forecast_date: String,
    predicted_aqi: i64,
    predicted_category: String,
    confidence_score: f64,
    model_version: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(StoredRow {
            city: row.get(0)?,
            state: row.get(1)?,
            forecast_date: row.get(2)?,
            predicted_aqi: row.get(3)?,
            predicted_category: row.get(4)?,
            confidence_score: row.get(5)?,
            model_version: row.get(6)?,
            latitude: row.get(7)?,
            longitude: row.get(8)?,
        })
    }
}

impl TryFrom<StoredRow> for ForecastRecord {
    type Error = ForecastError;
    fn try_from(val: StoredRow) -> Result<Self> {
        let forecast_date = Date::parse(&val.forecast_date, format_description!("[year]-[month]-[day]"))
            .map_err(|e| ForecastError::Store(format!("bad forecast date {}: {}", val.forecast_date, e)))?;
        let predicted_aqi = u32::try_from(val.predicted_aqi)
            .map_err(|_| ForecastError::Store(format!("bad predicted aqi {}", val.predicted_aqi)))?;
        Ok(ForecastRecord {
            location: Location::new(val.city, val.state),
            latitude: val.latitude,
            longitude: val.longitude,
            forecast_date,
            predicted_aqi,
            predicted_category: AqiCategory::from_str(&val.predicted_category)?,
            confidence_score: val.confidence_score,
            model_version: val.model_version,
        })
    }
}

impl ForecastStore for DuckDbForecastStore {
    fn upsert(&self, record: ForecastRecord) -> Result<UpsertOutcome> {
        let conn = self.lock()?;
        let forecast_date = record.forecast_date.to_string();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT predicted_aqi FROM aqi_forecast
                 WHERE city = ? AND state = ? AND forecast_date = CAST(? AS DATE)",
                params![record.location.city, record.location.state, forecast_date],
                |row| row.get(0),
            )
            .optional()?;

        conn.execute(
            "INSERT INTO aqi_forecast (city, state, forecast_date, predicted_aqi,
                predicted_category, confidence_score, model_version, latitude, longitude)
             VALUES (?, ?, CAST(? AS DATE), ?, ?, ?, ?, ?, ?)
             ON CONFLICT (city, state, forecast_date) DO UPDATE SET
                predicted_aqi = EXCLUDED.predicted_aqi,
                predicted_category = EXCLUDED.predicted_category,
                confidence_score = EXCLUDED.confidence_score,
                model_version = EXCLUDED.model_version,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude",
            params![
                record.location.city,
                record.location.state,
                forecast_date,
                i64::from(record.predicted_aqi),
                record.predicted_category.as_str(),
                record.confidence_score,
                record.model_version,
                record.latitude,
                record.longitude,
            ],
        )?;

        debug!(
            "stored forecast {} {} -> {}",
            record.location, forecast_date, record.predicted_aqi
        );
        Ok(match existing {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    fn get(&self, location: &Location, forecast_date: Date) -> Result<Option<ForecastRecord>> {
        let conn = self.lock()?;
        let stored = conn
            .query_row(
                &format!(
                    "{} WHERE city = ? AND state = ? AND forecast_date = CAST(? AS DATE)",
                    SELECT_COLUMNS
                ),
                params![location.city, location.state, forecast_date.to_string()],
                StoredRow::from_row,
            )
            .optional()?;
        stored.map(ForecastRecord::try_from).transpose()
    }

    fn list(&self, location: Option<&Location>) -> Result<Vec<ForecastRecord>> {
        let conn = self.lock()?;
        let rows: Vec<StoredRow> = match location {
            Some(location) => {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE lower(city) = lower(?) AND lower(state) = lower(?)
                     ORDER BY city, state, forecast_date",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![location.city, location.state], StoredRow::from_row)?
                    .collect::<duckdb::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("{} ORDER BY city, state, forecast_date", SELECT_COLUMNS))?;
                let rows = stmt
                    .query_map([], StoredRow::from_row)?
                    .collect::<duckdb::Result<Vec<_>>>()?;
                rows
            }
        };
        rows.into_iter().map(ForecastRecord::try_from).collect()
    }
}
