//! Deterministic synthetic observation history.
//!
//! Used to train a working model before any real observations have been
//! collected, and as a fixture in tests.

use std::f64::consts::PI;

use rand::{rngs::StdRng, Rng, SeedableRng};
use time::{Date, Duration, Time};

use crate::{Location, PollutantObservation, WeatherObservation};

pub const DEFAULT_SAMPLE_DAYS: u32 = 90;

#[derive(Debug, Clone, PartialEq)]
pub struct SampleCity {
    pub location: Location,
    pub latitude: f64,
    pub longitude: f64,
}

impl SampleCity {
    pub fn new(city: &str, state: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            location: Location::new(city, state),
            latitude,
            longitude,
        }
    }
}

pub fn default_cities() -> Vec<SampleCity> {
    vec![
        SampleCity::new("Delhi", "Delhi", 28.6139, 77.2090),
        SampleCity::new("Mumbai", "Maharashtra", 19.0760, 72.8777),
        SampleCity::new("Bangalore", "Karnataka", 12.9716, 77.5946),
    ]
}

#[derive(Debug, Clone, Default)]
pub struct SampleData {
    pub pollutants: Vec<PollutantObservation>,
    pub weather: Vec<WeatherObservation>,
}

/// One PM2.5 reading and one weather reading per city per day, following a
/// yearly sine with gaussian noise.
#[derive(Debug, Clone)]
pub struct SampleGenerator {
    start: Date,
    days: u32,
    seed: u64,
    cities: Vec<SampleCity>,
}

impl SampleGenerator {
    pub fn new(start: Date, days: u32) -> Self {
        Self {
            start,
            days,
            seed: 42,
            cities: default_cities(),
        }
    }

    /// History of `days` days ending the day before `today`.
    pub fn ending_before(today: Date, days: u32) -> Self {
        Self::new(today - Duration::days(i64::from(days)), days)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_cities(mut self, cities: Vec<SampleCity>) -> Self {
        self.cities = cities;
        self
    }

    pub fn generate(&self) -> SampleData {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut data = SampleData::default();

        for city in &self.cities {
            for offset in 0..self.days {
                let day = self.start + Duration::days(i64::from(offset));
                let observed_at = day.with_time(Time::MIDNIGHT) + Duration::hours(12);
                let season = (2.0 * PI * f64::from(day.ordinal()) / 365.0).sin();

                let aqi = (80.0 + 30.0 * season + gaussian(&mut rng, 0.0, 15.0)).max(10.0);
                data.pollutants.push(PollutantObservation {
                    location: city.location.clone(),
                    station: format!("{} Station", city.location.city),
                    latitude: Some(city.latitude),
                    longitude: Some(city.longitude),
                    pollutant_id: String::from("PM2.5"),
                    pollutant_avg: Some(aqi * 0.6),
                    aqi_value: Some(aqi.trunc()),
                    observed_at,
                });

                let temperature = 25.0 + 10.0 * season + gaussian(&mut rng, 0.0, 3.0);
                data.weather.push(WeatherObservation {
                    location: city.location.clone(),
                    latitude: Some(city.latitude),
                    longitude: Some(city.longitude),
                    temperature: Some(temperature),
                    humidity: Some(gaussian(&mut rng, 60.0, 15.0).clamp(20.0, 90.0)),
                    wind_speed: Some(gaussian(&mut rng, 10.0, 5.0).max(0.0)),
                    wind_direction: Some(rng.gen_range(0.0..360.0)),
                    pressure: Some(gaussian(&mut rng, 1013.0, 10.0)),
                    visibility: Some(gaussian(&mut rng, 8.0, 2.0).max(1.0)),
                    observed_at,
                });
            }
        }
        data
    }
}

/// Box-Muller draw from N(mean, std_dev²).
fn gaussian(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    mean + std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
