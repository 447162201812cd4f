pub mod file_access;
mod forecast_store;
mod parquet_source;
pub mod parquet_writer;

pub use file_access::{DataKind, FileAccess, FileParams};
pub use forecast_store::DuckDbForecastStore;
pub use parquet_source::ParquetObservationSource;
pub use parquet_writer::{write_forecasts, write_pollutants, write_weather};
