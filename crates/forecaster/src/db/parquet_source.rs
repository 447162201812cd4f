use duckdb::{
    arrow::array::{Array, Float64Array, RecordBatch, StringArray},
    params_from_iter, Connection,
};
use log::debug;
use regex::Regex;
use scooby::postgres::{select, Parameters, Select};

use super::file_access::{DataKind, FileAccess, FileParams};
use crate::observation::{format_timestamp, parse_timestamp};
use crate::source::{ObservationQuery, ObservationSource};
use crate::{ForecastError, Location, PollutantObservation, Result, WeatherObservation};

const POLLUTANT_COLUMNS: [&str; 9] = [
    "city",
    "state",
    "station",
    "latitude",
    "longitude",
    "pollutant_id",
    "pollutant_avg",
    "aqi_value",
    "observed_at",
];

const WEATHER_COLUMNS: [&str; 11] = [
    "city",
    "state",
    "latitude",
    "longitude",
    "temperature",
    "humidity",
    "wind_speed",
    "wind_direction",
    "pressure",
    "visibility",
    "observed_at",
];

/// Observations stored as parquet files, queried through an in-memory duckdb.
pub struct ParquetObservationSource {
    file_access: FileAccess,
}

impl ParquetObservationSource {
    pub fn new(file_access: FileAccess) -> Self {
        Self { file_access }
    }

    /// A fresh in-memory connection per query, so nothing is shared or locked
    /// between calls.
    pub fn open_connection(&self) -> std::result::Result<Connection, duckdb::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("INSTALL parquet; LOAD parquet;")?;
        Ok(conn)
    }

    pub fn query(
        &self,
        select: Select,
        params: Vec<String>,
    ) -> Result<Vec<RecordBatch>> {
        let re = Regex::new(r"\$(\d+)")?;
        let binding = select.to_string();
        let fixed_params = re.replace_all(&binding, "?");
        let conn = self.open_connection()?;
        let mut stmt = conn.prepare(&fixed_params)?;
        let sql_params = params_from_iter(params.iter());
        Ok(stmt.query_arrow(sql_params)?.collect())
    }

    fn filtered_select(
        &self,
        kind: DataKind,
        columns: &[&str],
        query: &ObservationQuery,
    ) -> Result<Option<Vec<RecordBatch>>> {
        let file_paths = self.file_access.grab_file_paths(&FileParams {
            kind: Some(kind),
            ..Default::default()
        })?;
        if file_paths.is_empty() {
            return Ok(None);
        }

        let mut placeholders = Parameters::new();
        let mut values: Vec<String> = vec![];
        let mut base_query = select(columns.join(", ")).from(format!(
            "read_parquet(['{}'], union_by_name = true)",
            file_paths.join("', '")
        ));

        if let Some(location) = &query.location {
            base_query = base_query.where_(format!(
                "lower(city) = lower({}) AND lower(state) = lower({})",
                placeholders.next(),
                placeholders.next()
            ));
            values.push(location.city.clone());
            values.push(location.state.clone());
        }
        if let Some(since) = query.since {
            base_query = base_query.where_(format!(
                "observed_at::TIMESTAMP >= {}::TIMESTAMP",
                placeholders.next()
            ));
            values.push(format_timestamp(since)?);
        }

        debug!("querying {} {} files", file_paths.len(), kind.prefix());
        Ok(Some(self.query(base_query, values)?))
    }
}

fn strings<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| ForecastError::Schema(format!("expected text column '{}'", name)))
}

fn floats<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
        .ok_or_else(|| ForecastError::Schema(format!("expected double column '{}'", name)))
}

fn text(arr: &StringArray, row: usize) -> String {
    if arr.is_null(row) {
        String::new()
    } else {
        arr.value(row).to_owned()
    }
}

fn number(arr: &Float64Array, row: usize) -> Option<f64> {
    (!arr.is_null(row)).then(|| arr.value(row))
}

fn pollutants_from_batch(batch: &RecordBatch) -> Result<Vec<PollutantObservation>> {
    let city = strings(batch, "city")?;
    let state = strings(batch, "state")?;
    let station = strings(batch, "station")?;
    let latitude = floats(batch, "latitude")?;
    let longitude = floats(batch, "longitude")?;
    let pollutant_id = strings(batch, "pollutant_id")?;
    let pollutant_avg = floats(batch, "pollutant_avg")?;
    let aqi_value = floats(batch, "aqi_value")?;
    let observed_at = strings(batch, "observed_at")?;

    (0..batch.num_rows())
        .map(|row| {
            Ok(PollutantObservation {
                location: Location::new(text(city, row), text(state, row)),
                station: text(station, row),
                latitude: number(latitude, row),
                longitude: number(longitude, row),
                pollutant_id: text(pollutant_id, row),
                pollutant_avg: number(pollutant_avg, row),
                aqi_value: number(aqi_value, row),
                observed_at: parse_timestamp(observed_at.value(row))?,
            })
        })
        .collect()
}

fn weather_from_batch(batch: &RecordBatch) -> Result<Vec<WeatherObservation>> {
    let city = strings(batch, "city")?;
    let state = strings(batch, "state")?;
    let latitude = floats(batch, "latitude")?;
    let longitude = floats(batch, "longitude")?;
    let temperature = floats(batch, "temperature")?;
    let humidity = floats(batch, "humidity")?;
    let wind_speed = floats(batch, "wind_speed")?;
    let wind_direction = floats(batch, "wind_direction")?;
    let pressure = floats(batch, "pressure")?;
    let visibility = floats(batch, "visibility")?;
    let observed_at = strings(batch, "observed_at")?;

    (0..batch.num_rows())
        .map(|row| {
            Ok(WeatherObservation {
                location: Location::new(text(city, row), text(state, row)),
                latitude: number(latitude, row),
                longitude: number(longitude, row),
                temperature: number(temperature, row),
                humidity: number(humidity, row),
                wind_speed: number(wind_speed, row),
                wind_direction: number(wind_direction, row),
                pressure: number(pressure, row),
                visibility: number(visibility, row),
                observed_at: parse_timestamp(observed_at.value(row))?,
            })
        })
        .collect()
}

impl ObservationSource for ParquetObservationSource {
    fn pollutant_observations(&self, query: &ObservationQuery) -> Result<Vec<PollutantObservation>> {
        let Some(batches) = self.filtered_select(DataKind::Pollutants, &POLLUTANT_COLUMNS, query)?
        else {
            return Ok(vec![]);
        };
        let mut observations = vec![];
        for batch in &batches {
            observations.extend(pollutants_from_batch(batch)?);
        }
        observations.sort_by(|a, b| {
            (&a.location.city, &a.location.state, a.observed_at)
                .cmp(&(&b.location.city, &b.location.state, b.observed_at))
        });
        Ok(observations)
    }

    fn weather_observations(&self, query: &ObservationQuery) -> Result<Vec<WeatherObservation>> {
        let Some(batches) = self.filtered_select(DataKind::Weather, &WEATHER_COLUMNS, query)? else {
            return Ok(vec![]);
        };
        let mut observations = vec![];
        for batch in &batches {
            observations.extend(weather_from_batch(batch)?);
        }
        observations.sort_by(|a, b| {
            (&a.location.city, &a.location.state, a.observed_at)
                .cmp(&(&b.location.city, &b.location.state, b.observed_at))
        });
        Ok(observations)
    }

    fn locations(&self) -> Result<Vec<Location>> {
        let file_paths = self.file_access.grab_file_paths(&FileParams {
            kind: Some(DataKind::Pollutants),
            ..Default::default()
        })?;
        if file_paths.is_empty() {
            return Ok(vec![]);
        }
        let query = select("DISTINCT city, state")
            .from(format!(
                "read_parquet(['{}'], union_by_name = true)",
                file_paths.join("', '")
            ));

        let mut locations = vec![];
        for batch in self.query(query, vec![])? {
            let city = strings(&batch, "city")?;
            let state = strings(&batch, "state")?;
            for row in 0..batch.num_rows() {
                locations.push(Location::new(text(city, row), text(state, row)));
            }
        }
        locations.sort_by(|a, b| (&a.city, &a.state).cmp(&(&b.city, &b.state)));
        Ok(locations)
    }
}
