//! Supervised (features, target) assembly with an explicit column schema.

use std::fmt;

use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::features::{AlignedSeries, FeatureRow, TemporalAlignment};
use crate::{ForecastError, Location, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureColumn {
    Latitude,
    Longitude,
    DayOfYear,
    Month,
    DayOfWeek,
    Temperature,
    Humidity,
    WindSpeed,
    Pressure,
    Visibility,
    AqiLag1,
    AqiLag2,
    AqiLag3,
    AqiLag7,
    AqiRolling3,
    AqiRolling7,
    AqiRolling14,
    TempRolling3,
    TempRolling7,
    TempRolling14,
    SeasonEncoded,
}

impl FeatureColumn {
    /// Every known column in canonical order.
    pub const ALL: [FeatureColumn; 21] = [
        FeatureColumn::Latitude,
        FeatureColumn::Longitude,
        FeatureColumn::DayOfYear,
        FeatureColumn::Month,
        FeatureColumn::DayOfWeek,
        FeatureColumn::Temperature,
        FeatureColumn::Humidity,
        FeatureColumn::WindSpeed,
        FeatureColumn::Pressure,
        FeatureColumn::Visibility,
        FeatureColumn::AqiLag1,
        FeatureColumn::AqiLag2,
        FeatureColumn::AqiLag3,
        FeatureColumn::AqiLag7,
        FeatureColumn::AqiRolling3,
        FeatureColumn::AqiRolling7,
        FeatureColumn::AqiRolling14,
        FeatureColumn::TempRolling3,
        FeatureColumn::TempRolling7,
        FeatureColumn::TempRolling14,
        FeatureColumn::SeasonEncoded,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FeatureColumn::Latitude => "latitude",
            FeatureColumn::Longitude => "longitude",
            FeatureColumn::DayOfYear => "day_of_year",
            FeatureColumn::Month => "month",
            FeatureColumn::DayOfWeek => "day_of_week",
            FeatureColumn::Temperature => "temperature",
            FeatureColumn::Humidity => "humidity",
            FeatureColumn::WindSpeed => "wind_speed",
            FeatureColumn::Pressure => "pressure",
            FeatureColumn::Visibility => "visibility",
            FeatureColumn::AqiLag1 => "aqi_lag_1",
            FeatureColumn::AqiLag2 => "aqi_lag_2",
            FeatureColumn::AqiLag3 => "aqi_lag_3",
            FeatureColumn::AqiLag7 => "aqi_lag_7",
            FeatureColumn::AqiRolling3 => "aqi_rolling_3",
            FeatureColumn::AqiRolling7 => "aqi_rolling_7",
            FeatureColumn::AqiRolling14 => "aqi_rolling_14",
            FeatureColumn::TempRolling3 => "temp_rolling_3",
            FeatureColumn::TempRolling7 => "temp_rolling_7",
            FeatureColumn::TempRolling14 => "temp_rolling_14",
            FeatureColumn::SeasonEncoded => "season_encoded",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Value of this column for `row`, `None` when the row has no value.
    pub fn value(&self, row: &FeatureRow, encoders: &CategoricalEncoders) -> Option<f64> {
        match self {
            FeatureColumn::Latitude => row.latitude,
            FeatureColumn::Longitude => row.longitude,
            FeatureColumn::DayOfYear => Some(f64::from(row.calendar.day_of_year)),
            FeatureColumn::Month => Some(f64::from(row.calendar.month)),
            FeatureColumn::DayOfWeek => Some(f64::from(row.calendar.day_of_week)),
            FeatureColumn::Temperature => Some(row.temperature),
            FeatureColumn::Humidity => row.humidity,
            FeatureColumn::WindSpeed => row.wind_speed,
            FeatureColumn::Pressure => row.pressure,
            FeatureColumn::Visibility => row.visibility,
            FeatureColumn::AqiLag1 => Some(row.lags.aqi_lag_1),
            FeatureColumn::AqiLag2 => Some(row.lags.aqi_lag_2),
            FeatureColumn::AqiLag3 => Some(row.lags.aqi_lag_3),
            FeatureColumn::AqiLag7 => Some(row.lags.aqi_lag_7),
            FeatureColumn::AqiRolling3 => Some(row.rolling.aqi_rolling_3),
            FeatureColumn::AqiRolling7 => Some(row.rolling.aqi_rolling_7),
            FeatureColumn::AqiRolling14 => Some(row.rolling.aqi_rolling_14),
            FeatureColumn::TempRolling3 => Some(row.rolling.temp_rolling_3),
            FeatureColumn::TempRolling7 => Some(row.rolling.temp_rolling_7),
            FeatureColumn::TempRolling14 => Some(row.rolling.temp_rolling_14),
            FeatureColumn::SeasonEncoded => encoders
                .season
                .transform(row.calendar.season.as_str())
                .map(|code| code as f64),
        }
    }
}

impl fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered feature columns recorded at fit time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureSchema {
    columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn new(columns: Vec<FeatureColumn>) -> Self {
        Self { columns }
    }

    /// Rebuild a schema from persisted column names.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let columns = names
            .iter()
            .map(|name| {
                FeatureColumn::from_name(name.as_ref()).ok_or_else(|| {
                    ForecastError::FeatureMismatch(format!(
                        "unknown feature column '{}'",
                        name.as_ref()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Inference vector for `row` in schema order; absent values become 0.0.
    pub fn vector(&self, row: &FeatureRow, encoders: &CategoricalEncoders) -> Vec<f64> {
        self.columns
            .iter()
            .map(|c| c.value(row, encoders).unwrap_or(0.0))
            .collect()
    }

    /// Reject manually supplied vectors that do not line up with the schema.
    pub fn check_width(&self, width: usize) -> Result<()> {
        if width != self.columns.len() {
            return Err(ForecastError::FeatureMismatch(format!(
                "expected {} features ({}), got {}",
                self.columns.len(),
                self.names().join(", "),
                width
            )));
        }
        Ok(())
    }
}

/// Integer encoding of a categorical feature; classes are kept sorted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut classes: Vec<String> = labels.into_iter().map(str::to_string).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    /// Index of `label` among the fitted classes, `None` if it was never seen.
    pub fn transform(&self, label: &str) -> Option<usize> {
        self.classes.binary_search_by(|c| c.as_str().cmp(label)).ok()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoricalEncoders {
    pub season: LabelEncoder,
}

/// Feature matrix, aligned targets and the state needed to rebuild
/// feature vectors at inference time.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub features: Array2<f64>,
    pub targets: Array1<f64>,
    pub schema: FeatureSchema,
    pub encoders: CategoricalEncoders,
    /// (location, date) of the feature row behind each example
    pub keys: Vec<(Location, Date)>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Pair each row with the AQI `forecast_days` steps ahead for its location.
///
/// Rows without such a future row are excluded. Columns that no example
/// carries a value for are left out of the schema, and examples missing a
/// value in a kept column are dropped.
pub fn build_training_set(
    rows: &[FeatureRow],
    forecast_days: usize,
    alignment: TemporalAlignment,
) -> Result<TrainingSet> {
    let mut sorted: Vec<&FeatureRow> = rows.iter().collect();
    sorted.sort_by(|a, b| (&a.location, a.date).cmp(&(&b.location, b.date)));

    let mut examples: Vec<(&FeatureRow, f64)> = Vec::new();
    for partition in sorted.chunk_by(|a, b| a.location == b.location) {
        let series = AlignedSeries::new(partition.iter().map(|r| r.date).collect(), alignment);
        for (idx, row) in partition.iter().enumerate() {
            if let Some(ahead) = series.offset(idx, forecast_days as i64) {
                examples.push((*row, partition[ahead].aqi_value));
            }
        }
    }

    let encoders = CategoricalEncoders {
        season: LabelEncoder::fit(examples.iter().map(|(r, _)| r.calendar.season.as_str())),
    };

    let columns: Vec<FeatureColumn> = FeatureColumn::ALL
        .into_iter()
        .filter(|c| examples.iter().any(|(r, _)| c.value(r, &encoders).is_some()))
        .collect();
    let schema = FeatureSchema::new(columns);

    let mut values = Vec::with_capacity(examples.len() * schema.len());
    let mut targets = Vec::with_capacity(examples.len());
    let mut keys = Vec::with_capacity(examples.len());
    for (row, target) in &examples {
        let vector: Option<Vec<f64>> = schema
            .columns()
            .iter()
            .map(|c| c.value(row, &encoders))
            .collect();
        if let Some(vector) = vector {
            values.extend(vector);
            targets.push(*target);
            keys.push((row.location.clone(), row.date));
        }
    }

    debug!(
        "assembled {} training examples from {} rows ({} with a target), {} feature columns",
        targets.len(),
        rows.len(),
        examples.len(),
        schema.len()
    );

    let features = Array2::from_shape_vec((targets.len(), schema.len()), values)
        .map_err(|e| ForecastError::FeatureMismatch(e.to_string()))?;
    Ok(TrainingSet {
        features,
        targets: Array1::from(targets),
        schema,
        encoders,
        keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Calendar, Lags, Rolling};
    use time::macros::date;
    use time::Duration;

    fn row(loc: &Location, day: Date, aqi: f64) -> FeatureRow {
        FeatureRow {
            location: loc.clone(),
            date: day,
            latitude: Some(19.0),
            longitude: Some(72.8),
            pollutant_avg: Some(aqi / 2.0),
            aqi_value: aqi,
            temperature: 25.0,
            humidity: Some(70.0),
            wind_speed: None,
            wind_direction: None,
            pressure: Some(1010.0),
            visibility: Some(5.0),
            calendar: Calendar::from(day),
            lags: Lags {
                aqi_lag_1: aqi - 1.0,
                aqi_lag_2: aqi - 2.0,
                aqi_lag_3: aqi - 3.0,
                aqi_lag_7: aqi - 7.0,
            },
            rolling: Rolling {
                aqi_rolling_3: aqi,
                aqi_rolling_7: aqi,
                aqi_rolling_14: aqi,
                temp_rolling_3: 25.0,
                temp_rolling_7: 25.0,
                temp_rolling_14: 25.0,
            },
        }
    }

    fn sequence(loc: &Location, start: Date, n: usize) -> Vec<FeatureRow> {
        (0..n)
            .map(|i| row(loc, start + Duration::days(i as i64), 50.0 + 10.0 * i as f64))
            .collect()
    }

    #[test]
    fn one_day_horizon_yields_n_minus_one_examples() {
        let loc = Location::new("Mumbai", "Maharashtra");
        let rows = sequence(&loc, date!(2024 - 06 - 01), 10);

        let set = build_training_set(&rows, 1, TemporalAlignment::Positional).unwrap();
        assert_eq!(set.len(), 9);
        for i in 0..9 {
            assert_eq!(set.targets[i], rows[i + 1].aqi_value);
            assert_eq!(set.keys[i].1, rows[i].date);
        }
    }

    #[test]
    fn targets_never_cross_locations() {
        let a = Location::new("Agra", "Uttar Pradesh");
        let b = Location::new("Bhopal", "Madhya Pradesh");
        let mut rows = sequence(&b, date!(2024 - 06 - 01), 4);
        rows.extend(sequence(&a, date!(2024 - 06 - 01), 4));

        let set = build_training_set(&rows, 2, TemporalAlignment::Positional).unwrap();
        assert_eq!(set.len(), 4);
        // per location: rows 0,1 get targets from rows 2,3
        assert_eq!(set.targets.to_vec(), vec![70.0, 80.0, 70.0, 80.0]);
        assert_eq!(set.keys[0].0, a);
        assert_eq!(set.keys[3].0, b);
    }

    #[test]
    fn positional_shift_ignores_gaps_but_calendar_does_not() {
        let loc = Location::new("Delhi", "Delhi");
        let start = date!(2024 - 06 - 01);
        let mut rows = sequence(&loc, start, 5);
        // 2024-06-03 missing
        rows.remove(2);

        let positional = build_training_set(&rows, 1, TemporalAlignment::Positional).unwrap();
        assert_eq!(positional.len(), 3);
        assert_eq!(positional.targets[1], 80.0);

        let calendar = build_training_set(&rows, 1, TemporalAlignment::Calendar).unwrap();
        assert_eq!(calendar.len(), 2);
        assert_eq!(calendar.keys[0].1, start);
        assert_eq!(calendar.keys[1].1, start + Duration::days(3));
    }

    #[test]
    fn absent_columns_leave_the_schema() {
        let loc = Location::new("Mumbai", "Maharashtra");
        let rows = sequence(&loc, date!(2024 - 06 - 01), 3);
        let set = build_training_set(&rows, 1, TemporalAlignment::Positional).unwrap();

        assert_eq!(set.schema.len(), 20);
        assert!(!set.schema.columns().contains(&FeatureColumn::WindSpeed));
        assert_eq!(set.features.ncols(), 20);
        assert_eq!(set.schema.names()[0], "latitude");
        assert_eq!(set.schema.names()[19], "season_encoded");
    }

    #[test]
    fn rows_missing_an_active_column_are_dropped() {
        let loc = Location::new("Mumbai", "Maharashtra");
        let mut rows = sequence(&loc, date!(2024 - 06 - 01), 4);
        rows[1].humidity = None;

        let set = build_training_set(&rows, 1, TemporalAlignment::Positional).unwrap();
        assert!(set.schema.columns().contains(&FeatureColumn::Humidity));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn empty_input_is_an_empty_set() {
        let set = build_training_set(&[], 1, TemporalAlignment::Positional).unwrap();
        assert!(set.is_empty());
        assert!(set.schema.is_empty());
    }

    #[test]
    fn schema_rebuild_rejects_unknown_names() {
        let schema = FeatureSchema::from_names(&["month", "aqi_lag_7"]).unwrap();
        assert_eq!(
            schema.columns(),
            &[FeatureColumn::Month, FeatureColumn::AqiLag7]
        );
        let err = FeatureSchema::from_names(&["month", "pm25_lag_1"]).unwrap_err();
        assert!(matches!(err, ForecastError::FeatureMismatch(_)));
        assert!(schema.check_width(3).is_err());
        assert!(schema.check_width(2).is_ok());
    }

    #[test]
    fn label_encoder_sorts_and_ignores_unseen() {
        let encoder = LabelEncoder::fit(["winter", "summer", "winter", "autumn"]);
        assert_eq!(encoder.classes(), &["autumn", "summer", "winter"]);
        assert_eq!(encoder.transform("winter"), Some(2));
        assert_eq!(encoder.transform("spring"), None);
    }

    #[test]
    fn inference_vector_zero_fills_absent_values() {
        let loc = Location::new("Mumbai", "Maharashtra");
        let mut r = row(&loc, date!(2024 - 12 - 20), 100.0);
        r.humidity = None;
        let encoders = CategoricalEncoders {
            season: LabelEncoder::fit(["summer"]),
        };
        let schema = FeatureSchema::new(vec![
            FeatureColumn::Month,
            FeatureColumn::Humidity,
            FeatureColumn::SeasonEncoded,
        ]);
        assert_eq!(schema.vector(&r, &encoders), vec![12.0, 0.0, 0.0]);
    }
}
