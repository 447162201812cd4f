use std::collections::BTreeSet;
use std::sync::RwLock;

use time::PrimitiveDateTime;

use crate::{ForecastError, Location, PollutantObservation, Result, WeatherObservation};

/// Filter for observation retrieval; `None` fields do not filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationQuery {
    pub location: Option<Location>,
    /// inclusive lower bound on the observation timestamp
    pub since: Option<PrimitiveDateTime>,
}

impl ObservationQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_location(location: Location, since: PrimitiveDateTime) -> Self {
        Self {
            location: Some(location),
            since: Some(since),
        }
    }

    fn admits(&self, location: &Location, observed_at: PrimitiveDateTime) -> bool {
        self.location.as_ref().map_or(true, |l| l.matches(location))
            && self.since.map_or(true, |since| observed_at >= since)
    }
}

/// Read-only access to historical pollutant and weather observations.
#[cfg_attr(test, mockall::automock)]
pub trait ObservationSource: Send + Sync {
    fn pollutant_observations(&self, query: &ObservationQuery) -> Result<Vec<PollutantObservation>>;

    fn weather_observations(&self, query: &ObservationQuery) -> Result<Vec<WeatherObservation>>;

    /// Distinct locations with pollutant observations, in (city, state) order.
    fn locations(&self) -> Result<Vec<Location>>;
}

#[derive(Default)]
pub struct MemoryObservationSource {
    pollutants: RwLock<Vec<PollutantObservation>>,
    weather: RwLock<Vec<WeatherObservation>>,
}

impl MemoryObservationSource {
    pub fn new(pollutants: Vec<PollutantObservation>, weather: Vec<WeatherObservation>) -> Self {
        Self {
            pollutants: RwLock::new(pollutants),
            weather: RwLock::new(weather),
        }
    }

    pub fn extend(
        &self,
        pollutants: Vec<PollutantObservation>,
        weather: Vec<WeatherObservation>,
    ) -> Result<()> {
        self.pollutants.write().map_err(poisoned)?.extend(pollutants);
        self.weather.write().map_err(poisoned)?.extend(weather);
        Ok(())
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> ForecastError {
    ForecastError::Store(format!("observation source lock poisoned: {}", e))
}

impl ObservationSource for MemoryObservationSource {
    fn pollutant_observations(&self, query: &ObservationQuery) -> Result<Vec<PollutantObservation>> {
        Ok(self
            .pollutants
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|o| query.admits(&o.location, o.observed_at))
            .cloned()
            .collect())
    }

    fn weather_observations(&self, query: &ObservationQuery) -> Result<Vec<WeatherObservation>> {
        Ok(self
            .weather
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|o| query.admits(&o.location, o.observed_at))
            .cloned()
            .collect())
    }

    fn locations(&self) -> Result<Vec<Location>> {
        let pollutants = self.pollutants.read().map_err(poisoned)?;
        let distinct: BTreeSet<&Location> = pollutants.iter().map(|o| &o.location).collect();
        Ok(distinct.into_iter().cloned().collect())
    }
}
