pub mod aqi;
mod config;
pub mod dataset;
pub mod db;
mod error;
pub mod features;
pub mod model;
mod observation;
mod response;
pub mod sample;
mod service;
pub mod source;
pub mod store;

pub use aqi::{compute_aqi, AqiCategory, Pollutant};
pub use config::*;
pub use error::*;
pub use features::{build_features, FeatureBuilder, FeatureRow, TemporalAlignment};
pub use model::{ForecastModel, Metrics, ModelKind, ModelParams};
pub use observation::*;
pub use response::*;
pub use service::*;
pub use source::{MemoryObservationSource, ObservationQuery, ObservationSource};
pub use store::{ForecastRecord, ForecastStore, MemoryForecastStore, UpsertOutcome};
