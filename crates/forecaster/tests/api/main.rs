mod forecast_store;
mod helpers;
mod parquet_source;
mod pipeline;
