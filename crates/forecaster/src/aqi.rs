//! Indian National AQI: pollutant breakpoints and category buckets.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{ForecastError, Result};

/// Highest value on the AQI scale; the open-ended Severe band saturates here.
pub const AQI_CEILING: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pollutant {
    Pm25,
    Pm10,
    No2,
    So2,
    Co,
    Ozone,
    Nh3,
}

/// (concentration low, concentration high, AQI low, AQI high)
type Breakpoint = (f64, f64, f64, f64);

impl Pollutant {
    pub fn code(&self) -> &'static str {
        match self {
            Pollutant::Pm25 => "PM2.5",
            Pollutant::Pm10 => "PM10",
            Pollutant::No2 => "NO2",
            Pollutant::So2 => "SO2",
            Pollutant::Co => "CO",
            Pollutant::Ozone => "OZONE",
            Pollutant::Nh3 => "NH3",
        }
    }

    /// Finite bands in ascending order. Concentrations above the last
    /// `concentration high` fall into the open-ended Severe band.
    fn breakpoints(&self) -> &'static [Breakpoint] {
        match self {
            Pollutant::Pm25 => &[
                (0.0, 30.0, 0.0, 50.0),
                (30.0, 60.0, 51.0, 100.0),
                (60.0, 90.0, 101.0, 200.0),
                (90.0, 120.0, 201.0, 300.0),
                (120.0, 250.0, 301.0, 400.0),
            ],
            Pollutant::Pm10 => &[
                (0.0, 50.0, 0.0, 50.0),
                (50.0, 100.0, 51.0, 100.0),
                (100.0, 250.0, 101.0, 200.0),
                (250.0, 350.0, 201.0, 300.0),
                (350.0, 430.0, 301.0, 400.0),
            ],
            Pollutant::No2 => &[
                (0.0, 40.0, 0.0, 50.0),
                (40.0, 80.0, 51.0, 100.0),
                (80.0, 180.0, 101.0, 200.0),
                (180.0, 280.0, 201.0, 300.0),
                (280.0, 400.0, 301.0, 400.0),
            ],
            Pollutant::So2 => &[
                (0.0, 40.0, 0.0, 50.0),
                (40.0, 80.0, 51.0, 100.0),
                (80.0, 380.0, 101.0, 200.0),
                (380.0, 800.0, 201.0, 300.0),
                (800.0, 1600.0, 301.0, 400.0),
            ],
            Pollutant::Co => &[
                (0.0, 1.0, 0.0, 50.0),
                (1.0, 2.0, 51.0, 100.0),
                (2.0, 10.0, 101.0, 200.0),
                (10.0, 17.0, 201.0, 300.0),
                (17.0, 34.0, 301.0, 400.0),
            ],
            Pollutant::Ozone => &[
                (0.0, 50.0, 0.0, 50.0),
                (50.0, 100.0, 51.0, 100.0),
                (100.0, 168.0, 101.0, 200.0),
                (168.0, 208.0, 201.0, 300.0),
                (208.0, 748.0, 301.0, 400.0),
            ],
            Pollutant::Nh3 => &[
                (0.0, 200.0, 0.0, 50.0),
                (200.0, 400.0, 51.0, 100.0),
                (400.0, 800.0, 101.0, 200.0),
                (800.0, 1200.0, 201.0, 300.0),
                (1200.0, 1800.0, 301.0, 400.0),
            ],
        }
    }

    /// Sub-index for a concentration, `None` for negative or non-finite input.
    pub fn sub_index(&self, concentration: f64) -> Option<u32> {
        if !concentration.is_finite() || concentration < 0.0 {
            return None;
        }
        let bands = self.breakpoints();
        for &(c_low, c_high, aqi_low, aqi_high) in bands {
            if concentration >= c_low && concentration <= c_high {
                let aqi = (aqi_high - aqi_low) / (c_high - c_low) * (concentration - c_low) + aqi_low;
                return Some(aqi.round_ties_even() as u32);
            }
        }
        // Severe: extrapolate with the width of the last finite band
        let &(c_low, c_high, _, _) = bands.last()?;
        let width = c_high - c_low;
        let aqi = 401.0 + (AQI_CEILING - 401.0) * (concentration - c_high) / width;
        Some(aqi.min(AQI_CEILING).round_ties_even() as u32)
    }
}

impl FromStr for Pollutant {
    type Err = ForecastError;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PM2.5" | "PM25" => Ok(Pollutant::Pm25),
            "PM10" => Ok(Pollutant::Pm10),
            "NO2" => Ok(Pollutant::No2),
            "SO2" => Ok(Pollutant::So2),
            "CO" => Ok(Pollutant::Co),
            "OZONE" | "O3" => Ok(Pollutant::Ozone),
            "NH3" => Ok(Pollutant::Nh3),
            _ => Err(ForecastError::UnsupportedPollutant(s.to_string())),
        }
    }
}

/// AQI for a pollutant code and concentration.
///
/// Unknown codes are an error; out-of-range concentrations give `Ok(None)`.
pub fn compute_aqi(pollutant_id: &str, concentration: f64) -> Result<Option<u32>> {
    let pollutant: Pollutant = pollutant_id.parse()?;
    Ok(pollutant.sub_index(concentration))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AqiCategory {
    Good,
    Satisfactory,
    Moderate,
    Poor,
    #[serde(rename = "Very Poor")]
    VeryPoor,
    Severe,
    Unknown,
}

impl AqiCategory {
    pub fn from_aqi(aqi_value: u32) -> Self {
        match aqi_value {
            0..=50 => AqiCategory::Good,
            51..=100 => AqiCategory::Satisfactory,
            101..=200 => AqiCategory::Moderate,
            201..=300 => AqiCategory::Poor,
            301..=400 => AqiCategory::VeryPoor,
            _ => AqiCategory::Severe,
        }
    }

    pub fn from_optional(aqi_value: Option<u32>) -> Self {
        aqi_value.map(Self::from_aqi).unwrap_or(AqiCategory::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Satisfactory => "Satisfactory",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::Poor => "Poor",
            AqiCategory::VeryPoor => "Very Poor",
            AqiCategory::Severe => "Severe",
            AqiCategory::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AqiCategory {
    type Err = ForecastError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Good" => Ok(AqiCategory::Good),
            "Satisfactory" => Ok(AqiCategory::Satisfactory),
            "Moderate" => Ok(AqiCategory::Moderate),
            "Poor" => Ok(AqiCategory::Poor),
            "Very Poor" => Ok(AqiCategory::VeryPoor),
            "Severe" => Ok(AqiCategory::Severe),
            "Unknown" => Ok(AqiCategory::Unknown),
            other => Err(ForecastError::Store(format!("unknown AQI category {}", other))),
        }
    }
}
