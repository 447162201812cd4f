use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use log::info;
use parquet::{
    file::{properties::WriterProperties, writer::SerializedFileWriter},
    record::RecordWriter,
};
use parquet_derive::ParquetRecordWriter;

use crate::observation::format_timestamp;
use crate::{ForecastRecord, PollutantObservation, Result as ForecastResult, WeatherObservation};

#[derive(Debug, ParquetRecordWriter)]
pub struct PollutantRow {
    pub city: String,
    pub state: String,
    pub station: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub pollutant_id: String,
    pub pollutant_avg: Option<f64>,
    pub aqi_value: Option<f64>,
    pub observed_at: String,
}

impl TryFrom<&PollutantObservation> for PollutantRow {
    type Error = crate::ForecastError;
    fn try_from(val: &PollutantObservation) -> ForecastResult<Self> {
        Ok(PollutantRow {
            city: val.location.city.clone(),
            state: val.location.state.clone(),
            station: val.station.clone(),
            latitude: val.latitude,
            longitude: val.longitude,
            pollutant_id: val.pollutant_id.clone(),
            pollutant_avg: val.pollutant_avg,
            aqi_value: val.aqi_value,
            observed_at: format_timestamp(val.observed_at)?,
        })
    }
}

#[derive(Debug, ParquetRecordWriter)]
pub struct WeatherRow {
    pub city: String,
    pub state: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub pressure: Option<f64>,
    pub visibility: Option<f64>,
    pub observed_at: String,
}

impl TryFrom<&WeatherObservation> for WeatherRow {
    type Error = crate::ForecastError;
    fn try_from(val: &WeatherObservation) -> ForecastResult<Self> {
        Ok(WeatherRow {
            city: val.location.city.clone(),
            state: val.location.state.clone(),
            latitude: val.latitude,
            longitude: val.longitude,
            temperature: val.temperature,
            humidity: val.humidity,
            wind_speed: val.wind_speed,
            wind_direction: val.wind_direction,
            pressure: val.pressure,
            visibility: val.visibility,
            observed_at: format_timestamp(val.observed_at)?,
        })
    }
}

#[derive(Debug, ParquetRecordWriter)]
pub struct ForecastRow {
    pub city: String,
    pub state: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub forecast_date: String,
    pub predicted_aqi: i64,
    pub predicted_category: String,
    pub confidence_score: f64,
    pub model_version: String,
}

impl From<&ForecastRecord> for ForecastRow {
    fn from(val: &ForecastRecord) -> Self {
        ForecastRow {
            city: val.location.city.clone(),
            state: val.location.state.clone(),
            latitude: val.latitude,
            longitude: val.longitude,
            forecast_date: val.forecast_date.to_string(),
            predicted_aqi: i64::from(val.predicted_aqi),
            predicted_category: val.predicted_category.to_string(),
            confidence_score: val.confidence_score,
            model_version: val.model_version.clone(),
        }
    }
}

/// Write `rows` to `path` as a single row group.
pub fn write_rows<'a, T>(path: &Path, rows: &'a [T]) -> ForecastResult<usize>
where
    &'a [T]: RecordWriter<T>,
{
    let schema = rows.schema()?;
    let file = File::create(path)?;
    let props = WriterProperties::builder().build();
    let mut writer = SerializedFileWriter::new(file, schema, Arc::new(props))?;

    let mut row_group = writer.next_row_group()?;
    rows.write_to_row_group(&mut row_group)?;
    row_group.close()?;
    writer.close()?;

    info!("wrote {} rows to {}", rows.len(), path.display());
    Ok(rows.len())
}

pub fn write_pollutants(path: &Path, observations: &[PollutantObservation]) -> ForecastResult<usize> {
    let rows = observations
        .iter()
        .map(PollutantRow::try_from)
        .collect::<ForecastResult<Vec<_>>>()?;
    write_rows(path, rows.as_slice())
}

pub fn write_weather(path: &Path, observations: &[WeatherObservation]) -> ForecastResult<usize> {
    let rows = observations
        .iter()
        .map(WeatherRow::try_from)
        .collect::<ForecastResult<Vec<_>>>()?;
    write_rows(path, rows.as_slice())
}

pub fn write_forecasts(path: &Path, records: &[ForecastRecord]) -> ForecastResult<usize> {
    let rows: Vec<ForecastRow> = records.iter().map(ForecastRow::from).collect();
    write_rows(path, rows.as_slice())
}
