//! AirQ Core Library
//!
//! Shared utilities for the forecaster library and the daemon:
//! - Configuration loading (XDG-compliant)
//! - File system utilities, including atomic file replacement
//! - Common constants

mod config;
pub mod fs;

pub use config::{find_config_file, get_xdg_data_dir, load_config, ConfigSource};
pub use fs::{create_dir_all, replace_file, staging_path, write_staged, write_synced};

/// Application name used for XDG paths
pub const APP_NAME: &str = "airq";

/// Default interval between forecast runs (6 hours)
pub const DEFAULT_RUN_INTERVAL: u64 = 6 * 3600;

/// Upper bound on forecast horizon accepted by the service
pub const MAX_FORECAST_DAYS: u32 = 7;
