use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date, PrimitiveDateTime};

use crate::{aqi, ForecastError, Result};

/// A city is identified by its (city, state) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub city: String,
    pub state: String,
}

impl Location {
    pub fn new(city: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            state: state.into(),
        }
    }

    /// Case-insensitive comparison, used when matching user supplied names
    /// against stored observations.
    pub fn matches(&self, other: &Location) -> bool {
        self.city.eq_ignore_ascii_case(&other.city) && self.state.eq_ignore_ascii_case(&other.state)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.city, self.state)
    }
}

/// One pollutant station reading with its precomputed AQI.
#[derive(Debug, Clone, PartialEq)]
pub struct PollutantObservation {
    pub location: Location,
    pub station: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub pollutant_id: String,
    pub pollutant_avg: Option<f64>,
    pub aqi_value: Option<f64>,
    pub observed_at: PrimitiveDateTime,
}

/// One weather reading for a city.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherObservation {
    pub location: Location,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub pressure: Option<f64>,
    pub visibility: Option<f64>,
    pub observed_at: PrimitiveDateTime,
}

/// A pollutant record as delivered by the upstream provider: string
/// timestamp, AQI possibly missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPollutantReading {
    pub city: String,
    pub state: String,
    #[serde(default)]
    pub station: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub pollutant_id: String,
    pub pollutant_avg: Option<f64>,
    pub aqi_value: Option<f64>,
    pub last_update: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWeatherReading {
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
    pub recorded_at: String,
}

impl TryFrom<RawPollutantReading> for PollutantObservation {
    type Error = ForecastError;
    fn try_from(val: RawPollutantReading) -> Result<Self> {
        let observed_at = parse_timestamp(&val.last_update)?;
        let aqi_value = match val.aqi_value {
            Some(v) => Some(v),
            None => match val.pollutant_avg {
                Some(concentration) => {
                    aqi::compute_aqi(&val.pollutant_id, concentration)?.map(f64::from)
                }
                None => None,
            },
        };
        Ok(PollutantObservation {
            location: Location::new(val.city, val.state),
            station: val.station,
            latitude: val.latitude,
            longitude: val.longitude,
            pollutant_id: val.pollutant_id,
            pollutant_avg: val.pollutant_avg,
            aqi_value,
            observed_at,
        })
    }
}

impl TryFrom<RawWeatherReading> for WeatherObservation {
    type Error = ForecastError;
    fn try_from(val: RawWeatherReading) -> Result<Self> {
        Ok(WeatherObservation {
            observed_at: parse_timestamp(&val.recorded_at)?,
            location: Location::new(val.city, val.state),
            latitude: val.latitude,
            longitude: val.longitude,
            temperature: val.temperature,
            humidity: val.humidity,
            wind_speed: val.wind_speed,
            wind_direction: val.wind_direction,
            pressure: val.pressure,
            visibility: val.visibility,
        })
    }
}

/// Parse a timezone-naive timestamp in any of the formats upstream providers use.
///
/// A bare date is read as midnight.
pub fn parse_timestamp(raw: &str) -> Result<PrimitiveDateTime> {
    let raw = raw.trim();
    let datetime_formats = [
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        format_description!("[day]-[month]-[year] [hour]:[minute]:[second]"),
        format_description!("[day]/[month]/[year] [hour]:[minute]:[second]"),
    ];
    for format in datetime_formats {
        if let Ok(parsed) = PrimitiveDateTime::parse(raw, format) {
            return Ok(parsed);
        }
    }
    if let Ok(date) = Date::parse(raw, format_description!("[year]-[month]-[day]")) {
        return Ok(date.midnight());
    }
    Err(ForecastError::MalformedTimestamp(raw.to_string()))
}

/// Canonical textual form used when observations are written to storage.
pub fn format_timestamp(value: PrimitiveDateTime) -> Result<String> {
    Ok(value.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second]"
    ))?)
}
