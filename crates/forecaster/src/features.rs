//! Daily aggregation, calendar, lag and rolling-window features.
//!
//! Observations are averaged per (city, state, date), pollutant and weather
//! aggregates are inner-joined, and each location's chronological sequence is
//! enriched with lag and trailing-mean features. Rows whose lag or rolling
//! values cannot be filled are dropped.

use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use time::{Date, Duration};

use crate::{Location, PollutantObservation, WeatherObservation};

/// Days back for the AQI lag features.
pub const LAG_DAYS: [usize; 4] = [1, 2, 3, 7];
/// Trailing window lengths (current day inclusive) for rolling means.
pub const ROLLING_WINDOWS: [usize; 3] = [3, 7, 14];

/// How "k days before/after" is resolved inside a location's sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalAlignment {
    /// k rows earlier/later in the sorted sequence, regardless of gaps
    #[default]
    Positional,
    /// the row dated exactly k calendar days earlier/later, if present
    Calendar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    pub fn from_month(month: u8) -> Self {
        match month {
            12 | 1 | 2 => Season::Winter,
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            _ => Season::Autumn,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Autumn => "autumn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calendar {
    /// 1..=366
    pub day_of_year: u16,
    /// 1..=12
    pub month: u8,
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: u8,
    pub season: Season,
}

impl From<Date> for Calendar {
    fn from(date: Date) -> Self {
        let month = u8::from(date.month());
        Calendar {
            day_of_year: date.ordinal(),
            month,
            day_of_week: date.weekday().number_days_from_monday(),
            season: Season::from_month(month),
        }
    }
}

/// Mean of every numeric quantity for one (city, state, date).
#[derive(Debug, Clone, PartialEq)]
pub struct DailyAggregate {
    pub location: Location,
    pub date: Date,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub pollutant_avg: Option<f64>,
    pub aqi_value: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub pressure: Option<f64>,
    pub visibility: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lags {
    pub aqi_lag_1: f64,
    pub aqi_lag_2: f64,
    pub aqi_lag_3: f64,
    pub aqi_lag_7: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rolling {
    pub aqi_rolling_3: f64,
    pub aqi_rolling_7: f64,
    pub aqi_rolling_14: f64,
    pub temp_rolling_3: f64,
    pub temp_rolling_7: f64,
    pub temp_rolling_14: f64,
}

/// A daily aggregate with complete calendar, lag and rolling features.
///
/// AQI and temperature are always present: both feed the rolling windows,
/// which include the current day.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub location: Location,
    pub date: Date,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub pollutant_avg: Option<f64>,
    pub aqi_value: f64,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub pressure: Option<f64>,
    pub visibility: Option<f64>,
    pub calendar: Calendar,
    pub lags: Lags,
    pub rolling: Rolling,
}

#[derive(Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.sum += v;
            self.count += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[derive(Default)]
struct Coordinates {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl Coordinates {
    fn keep_first(&mut self, latitude: Option<f64>, longitude: Option<f64>) {
        if self.latitude.is_none() {
            self.latitude = latitude;
        }
        if self.longitude.is_none() {
            self.longitude = longitude;
        }
    }
}

type DayKey = (Location, Date);

#[derive(Default)]
struct PollutantDay {
    coordinates: Coordinates,
    pollutant_avg: Mean,
    aqi_value: Mean,
}

#[derive(Default)]
struct WeatherDay {
    coordinates: Coordinates,
    temperature: Mean,
    humidity: Mean,
    wind_speed: Mean,
    wind_direction: Mean,
    pressure: Mean,
    visibility: Mean,
}

/// Per-day pollutant means, keyed and ordered by (city, state, date).
fn aggregate_pollutants(observations: &[PollutantObservation]) -> BTreeMap<DayKey, PollutantDay> {
    let mut days: BTreeMap<DayKey, PollutantDay> = BTreeMap::new();
    for obs in observations {
        let day = days
            .entry((obs.location.clone(), obs.observed_at.date()))
            .or_default();
        day.coordinates.keep_first(obs.latitude, obs.longitude);
        day.pollutant_avg.push(obs.pollutant_avg);
        day.aqi_value.push(obs.aqi_value);
    }
    days
}

fn aggregate_weather(observations: &[WeatherObservation]) -> BTreeMap<DayKey, WeatherDay> {
    let mut days: BTreeMap<DayKey, WeatherDay> = BTreeMap::new();
    for obs in observations {
        let day = days
            .entry((obs.location.clone(), obs.observed_at.date()))
            .or_default();
        day.coordinates.keep_first(obs.latitude, obs.longitude);
        day.temperature.push(obs.temperature);
        day.humidity.push(obs.humidity);
        day.wind_speed.push(obs.wind_speed);
        day.wind_direction.push(obs.wind_direction);
        day.pressure.push(obs.pressure);
        day.visibility.push(obs.visibility);
    }
    days
}

/// Aggregate both sources per day and inner-join them on (city, state, date).
///
/// Output is sorted by (city, state, date).
pub fn daily_aggregates(
    pollutants: &[PollutantObservation],
    weather: &[WeatherObservation],
) -> Vec<DailyAggregate> {
    let pollutant_days = aggregate_pollutants(pollutants);
    let weather_days = aggregate_weather(weather);

    pollutant_days
        .into_iter()
        .filter_map(|(key, p)| {
            let w = weather_days.get(&key)?;
            let (location, date) = key;
            Some(DailyAggregate {
                location,
                date,
                latitude: p.coordinates.latitude.or(w.coordinates.latitude),
                longitude: p.coordinates.longitude.or(w.coordinates.longitude),
                pollutant_avg: p.pollutant_avg.value(),
                aqi_value: p.aqi_value.value(),
                temperature: w.temperature.value(),
                humidity: w.humidity.value(),
                wind_speed: w.wind_speed.value(),
                wind_direction: w.wind_direction.value(),
                pressure: w.pressure.value(),
                visibility: w.visibility.value(),
            })
        })
        .collect()
}

/// Index arithmetic over one location's chronologically sorted dates.
pub(crate) struct AlignedSeries {
    dates: Vec<Date>,
    by_date: HashMap<Date, usize>,
    alignment: TemporalAlignment,
}

impl AlignedSeries {
    pub(crate) fn new(dates: Vec<Date>, alignment: TemporalAlignment) -> Self {
        let by_date = dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();
        Self {
            dates,
            by_date,
            alignment,
        }
    }

    /// Index of the row `offset` steps from `idx` (negative looks back).
    pub(crate) fn offset(&self, idx: usize, offset: i64) -> Option<usize> {
        match self.alignment {
            TemporalAlignment::Positional => {
                let target = idx as i64 + offset;
                (target >= 0 && (target as usize) < self.dates.len()).then_some(target as usize)
            }
            TemporalAlignment::Calendar => {
                let date = self.dates.get(idx)?.checked_add(Duration::days(offset))?;
                self.by_date.get(&date).copied()
            }
        }
    }

    /// Indices of the trailing window ending at `idx`, if all are present.
    fn window(&self, idx: usize, length: usize) -> Option<Vec<usize>> {
        (0..length as i64)
            .map(|back| self.offset(idx, -back))
            .collect()
    }
}

fn trailing_mean(values: &[Option<f64>], window: &[usize]) -> Option<f64> {
    let mut sum = 0.0;
    for &i in window {
        sum += values[i]?;
    }
    Some(sum / window.len() as f64)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureBuilder {
    pub alignment: TemporalAlignment,
}

impl FeatureBuilder {
    pub fn new(alignment: TemporalAlignment) -> Self {
        Self { alignment }
    }

    /// Build complete feature rows from raw observations.
    ///
    /// Empty output is a valid result: it means the two sources share no
    /// (city, state, date) or no location has enough history.
    pub fn build(
        &self,
        pollutants: &[PollutantObservation],
        weather: &[WeatherObservation],
    ) -> Vec<FeatureRow> {
        let daily = daily_aggregates(pollutants, weather);
        let joined = daily.len();

        let rows: Vec<FeatureRow> = daily
            .into_iter()
            .chunk_by(|d| d.location.clone())
            .into_iter()
            .flat_map(|(_, days)| self.location_rows(days.collect()))
            .collect();

        debug!(
            "built {} feature rows from {} joined days ({} pollutant, {} weather observations)",
            rows.len(),
            joined,
            pollutants.len(),
            weather.len()
        );
        rows
    }

    fn location_rows(&self, days: Vec<DailyAggregate>) -> Vec<FeatureRow> {
        let series = AlignedSeries::new(days.iter().map(|d| d.date).collect(), self.alignment);
        let aqi: Vec<Option<f64>> = days.iter().map(|d| d.aqi_value).collect();
        let temperature: Vec<Option<f64>> = days.iter().map(|d| d.temperature).collect();

        let lag = |idx: usize, k: usize| series.offset(idx, -(k as i64)).and_then(|j| aqi[j]);
        let mean_over = |values: &[Option<f64>], idx: usize, w: usize| {
            series
                .window(idx, w)
                .and_then(|window| trailing_mean(values, &window))
        };

        days.iter()
            .enumerate()
            .filter_map(|(idx, day)| {
                let lags = Lags {
                    aqi_lag_1: lag(idx, LAG_DAYS[0])?,
                    aqi_lag_2: lag(idx, LAG_DAYS[1])?,
                    aqi_lag_3: lag(idx, LAG_DAYS[2])?,
                    aqi_lag_7: lag(idx, LAG_DAYS[3])?,
                };
                let rolling = Rolling {
                    aqi_rolling_3: mean_over(&aqi, idx, ROLLING_WINDOWS[0])?,
                    aqi_rolling_7: mean_over(&aqi, idx, ROLLING_WINDOWS[1])?,
                    aqi_rolling_14: mean_over(&aqi, idx, ROLLING_WINDOWS[2])?,
                    temp_rolling_3: mean_over(&temperature, idx, ROLLING_WINDOWS[0])?,
                    temp_rolling_7: mean_over(&temperature, idx, ROLLING_WINDOWS[1])?,
                    temp_rolling_14: mean_over(&temperature, idx, ROLLING_WINDOWS[2])?,
                };
                Some(FeatureRow {
                    location: day.location.clone(),
                    date: day.date,
                    latitude: day.latitude,
                    longitude: day.longitude,
                    pollutant_avg: day.pollutant_avg,
                    aqi_value: day.aqi_value?,
                    temperature: day.temperature?,
                    humidity: day.humidity,
                    wind_speed: day.wind_speed,
                    wind_direction: day.wind_direction,
                    pressure: day.pressure,
                    visibility: day.visibility,
                    calendar: Calendar::from(day.date),
                    lags,
                    rolling,
                })
            })
            .collect()
    }
}

/// [`FeatureBuilder::build`] with positional alignment.
pub fn build_features(
    pollutants: &[PollutantObservation],
    weather: &[WeatherObservation],
) -> Vec<FeatureRow> {
    FeatureBuilder::default().build(pollutants, weather)
}

/// The most recent row for `location`, whatever order `rows` is in.
pub fn latest_row<'a>(rows: &'a [FeatureRow], location: &Location) -> Option<&'a FeatureRow> {
    rows.iter()
        .filter(|r| r.location.matches(location))
        .max_by_key(|r| r.date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use time::macros::{date, datetime};
    use time::PrimitiveDateTime;

    fn pollutant(loc: &Location, at: PrimitiveDateTime, aqi: f64) -> PollutantObservation {
        PollutantObservation {
            location: loc.clone(),
            station: String::from("station"),
            latitude: Some(28.6),
            longitude: Some(77.2),
            pollutant_id: String::from("PM2.5"),
            pollutant_avg: Some(aqi * 0.6),
            aqi_value: Some(aqi),
            observed_at: at,
        }
    }

    fn weather(loc: &Location, at: PrimitiveDateTime, temperature: f64) -> WeatherObservation {
        WeatherObservation {
            location: loc.clone(),
            latitude: Some(28.6),
            longitude: Some(77.2),
            temperature: Some(temperature),
            humidity: Some(60.0),
            wind_speed: Some(10.0),
            wind_direction: Some(180.0),
            pressure: Some(1013.0),
            visibility: Some(8.0),
            observed_at: at,
        }
    }

    fn daily_series(
        loc: &Location,
        start: Date,
        days: usize,
    ) -> (Vec<PollutantObservation>, Vec<WeatherObservation>) {
        let mut p = Vec::new();
        let mut w = Vec::new();
        for i in 0..days {
            let at = (start + Duration::days(i as i64)).with_hms(9, 0, 0).unwrap();
            p.push(pollutant(loc, at, 100.0 + i as f64));
            w.push(weather(loc, at, 20.0 + i as f64));
        }
        (p, w)
    }

    #[test]
    fn daily_means_equal_arithmetic_mean() {
        let loc = Location::new("Delhi", "Delhi");
        let p = vec![
            pollutant(&loc, datetime!(2024-01-10 01:00:00), 100.0),
            pollutant(&loc, datetime!(2024-01-10 13:00:00), 150.0),
            pollutant(&loc, datetime!(2024-01-10 23:59:59), 110.0),
        ];
        let w = vec![
            weather(&loc, datetime!(2024-01-10 06:00:00), 10.0),
            weather(&loc, datetime!(2024-01-10 18:00:00), 20.0),
        ];

        let daily = daily_aggregates(&p, &w);
        assert_eq!(daily.len(), 1);
        assert_relative_eq!(daily[0].aqi_value.unwrap(), 120.0);
        assert_relative_eq!(daily[0].pollutant_avg.unwrap(), 72.0);
        assert_relative_eq!(daily[0].temperature.unwrap(), 15.0);
    }

    #[test]
    fn single_observation_self_aggregates() {
        let loc = Location::new("Pune", "Maharashtra");
        let p = vec![pollutant(&loc, datetime!(2024-02-01 08:00:00), 42.0)];
        let w = vec![weather(&loc, datetime!(2024-02-01 08:00:00), 31.5)];

        let daily = daily_aggregates(&p, &w);
        assert_eq!(daily[0].aqi_value, Some(42.0));
        assert_eq!(daily[0].temperature, Some(31.5));
        assert_eq!(daily[0].humidity, Some(60.0));
    }

    #[test]
    fn first_non_null_coordinates_are_kept() {
        let loc = Location::new("Delhi", "Delhi");
        let mut first = pollutant(&loc, datetime!(2024-01-10 01:00:00), 100.0);
        first.latitude = None;
        let mut second = pollutant(&loc, datetime!(2024-01-10 02:00:00), 100.0);
        second.latitude = Some(1.5);
        let mut third = pollutant(&loc, datetime!(2024-01-10 03:00:00), 100.0);
        third.latitude = Some(2.5);
        let w = vec![weather(&loc, datetime!(2024-01-10 06:00:00), 10.0)];

        let daily = daily_aggregates(&[first, second, third], &w);
        assert_eq!(daily[0].latitude, Some(1.5));
    }

    #[test]
    fn join_drops_days_present_in_one_source() {
        let loc = Location::new("Delhi", "Delhi");
        let p = vec![
            pollutant(&loc, datetime!(2024-01-10 01:00:00), 100.0),
            pollutant(&loc, datetime!(2024-01-11 01:00:00), 100.0),
        ];
        let w = vec![
            weather(&loc, datetime!(2024-01-11 06:00:00), 10.0),
            weather(&loc, datetime!(2024-01-12 06:00:00), 10.0),
        ];

        let daily = daily_aggregates(&p, &w);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].date, date!(2024 - 01 - 11));
    }

    #[test]
    fn disjoint_sources_give_no_rows() {
        let a = Location::new("Delhi", "Delhi");
        let b = Location::new("Chennai", "Tamil Nadu");
        let (p, _) = daily_series(&a, date!(2024 - 01 - 01), 20);
        let (_, w) = daily_series(&b, date!(2024 - 01 - 01), 20);
        assert!(build_features(&p, &w).is_empty());
    }

    #[test]
    fn twenty_day_sequence_starts_at_day_fourteen() {
        let loc = Location::new("Delhi", "Delhi");
        let start = date!(2024 - 03 - 01);
        let (p, w) = daily_series(&loc, start, 20);

        let rows = build_features(&p, &w);
        assert_eq!(rows.len(), 7);
        assert_eq!(rows[0].date, start + Duration::days(13));

        let first = &rows[0];
        // day 14 has aqi 113; lag-7 is day 7 (aqi 106)
        assert_relative_eq!(first.lags.aqi_lag_1, 112.0);
        assert_relative_eq!(first.lags.aqi_lag_7, 106.0);
        assert_relative_eq!(first.rolling.aqi_rolling_3, 112.0);
        assert_relative_eq!(first.rolling.aqi_rolling_14, 106.5);
        assert_relative_eq!(first.rolling.temp_rolling_7, 30.0);
    }

    #[test]
    fn calendar_fields_follow_the_date() {
        let loc = Location::new("Delhi", "Delhi");
        let (p, w) = daily_series(&loc, date!(2024 - 02 - 10), 20);
        let rows = build_features(&p, &w);

        // 2024-02-23 is a Friday, day 54 of a leap year
        let first = &rows[0];
        assert_eq!(first.date, date!(2024 - 02 - 23));
        assert_eq!(first.calendar.day_of_year, 54);
        assert_eq!(first.calendar.month, 2);
        assert_eq!(first.calendar.day_of_week, 4);
        assert_eq!(first.calendar.season, Season::Winter);

        let leap_day = rows.last().unwrap();
        assert_eq!(leap_day.date, date!(2024 - 02 - 29));
        assert_eq!(leap_day.calendar.day_of_year, 60);
    }

    #[test]
    fn seasons_by_month() {
        let expected = [
            (1, Season::Winter),
            (2, Season::Winter),
            (3, Season::Spring),
            (5, Season::Spring),
            (6, Season::Summer),
            (8, Season::Summer),
            (9, Season::Autumn),
            (11, Season::Autumn),
            (12, Season::Winter),
        ];
        for (month, season) in expected {
            assert_eq!(Season::from_month(month), season);
        }
    }

    #[test]
    fn no_leakage_across_interleaved_locations() {
        let a = Location::new("Agra", "Uttar Pradesh");
        let b = Location::new("Bhopal", "Madhya Pradesh");
        let start = date!(2024 - 05 - 01);
        let (pa, wa) = daily_series(&a, start, 16);
        let mut pb = Vec::new();
        let mut wb = Vec::new();
        for i in 0..16 {
            let at = (start + Duration::days(i)).with_hms(9, 0, 0).unwrap();
            pb.push(pollutant(&b, at, 400.0));
            wb.push(weather(&b, at, -5.0));
        }
        // interleave a and b
        let p: Vec<_> = pa.into_iter().interleave(pb).collect();
        let w: Vec<_> = wb.into_iter().interleave(wa).collect();

        let rows = build_features(&p, &w);
        assert_eq!(rows.len(), 6);
        for row in rows.iter().filter(|r| r.location == b) {
            assert_relative_eq!(row.lags.aqi_lag_7, 400.0);
            assert_relative_eq!(row.rolling.aqi_rolling_14, 400.0);
            assert_relative_eq!(row.rolling.temp_rolling_3, -5.0);
        }
        for row in rows.iter().filter(|r| r.location == a) {
            assert!(row.rolling.aqi_rolling_14 < 200.0);
        }
    }

    #[test]
    fn missing_aqi_inside_window_drops_row() {
        let loc = Location::new("Delhi", "Delhi");
        let (mut p, w) = daily_series(&loc, date!(2024 - 03 - 01), 20);
        // day 16 (index 15) loses its AQI
        p[15].aqi_value = None;

        let rows = build_features(&p, &w);
        assert!(rows.iter().all(|r| r.date != date!(2024 - 03 - 16)));
        // rows up to 14 days later still see the hole in their 14-day window
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn calendar_alignment_requires_contiguous_days() {
        let loc = Location::new("Delhi", "Delhi");
        let (mut p, mut w) = daily_series(&loc, date!(2024 - 03 - 01), 20);
        // remove day 10 entirely
        p.remove(9);
        w.remove(9);

        let positional = FeatureBuilder::new(TemporalAlignment::Positional).build(&p, &w);
        let calendar = FeatureBuilder::new(TemporalAlignment::Calendar).build(&p, &w);
        assert_eq!(positional.len(), 6);
        // the 14-day window spans the gap until 2024-03-24
        assert!(calendar.is_empty());
    }

    #[test]
    fn latest_row_picks_max_date() {
        let loc = Location::new("Delhi", "Delhi");
        let (p, w) = daily_series(&loc, date!(2024 - 03 - 01), 18);
        let mut rows = build_features(&p, &w);
        rows.reverse();

        let latest = latest_row(&rows, &Location::new("delhi", "delhi")).unwrap();
        assert_eq!(latest.date, date!(2024 - 03 - 18));
        assert!(latest_row(&rows, &Location::new("Goa", "Goa")).is_none());
    }
}
