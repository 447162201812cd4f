//! Configuration discovery and loading
//!
//! A configuration is assembled from several sources, highest priority first:
//! 1. CLI arguments
//! 2. Environment variables
//! 3. A TOML file (explicit path or one of the standard locations)
//! 4. Built-in defaults

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::de::DeserializeOwned;

use crate::APP_NAME;

/// Where a configuration file was found
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Path given on the command line or through the environment
    Explicit(PathBuf),
    /// Found in the working directory
    CurrentDir(PathBuf),
    /// Found under `$XDG_CONFIG_HOME/airq/`
    XdgConfig(PathBuf),
    /// Found under `/etc/airq/`
    System(PathBuf),
    /// Nothing found, defaults apply
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigSource::Explicit(p)
            | ConfigSource::CurrentDir(p)
            | ConfigSource::XdgConfig(p)
            | ConfigSource::System(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.path() {
            Some(p) => write!(f, "{}", p.display()),
            None => write!(f, "(defaults)"),
        }
    }
}

/// Locate a configuration file
///
/// Search order:
/// 1. The path named by `env_var` (e.g. `AIRQ_DAEMON_CONFIG`), if it exists
/// 2. `filename` in the working directory
/// 3. `$XDG_CONFIG_HOME/airq/<filename>` (or `~/.config/airq/<filename>`)
/// 4. `/etc/airq/<filename>`
pub fn find_config_file(env_var: &str, filename: &str) -> ConfigSource {
    if let Ok(path) = env::var(env_var) {
        let p = PathBuf::from(&path);
        if p.exists() {
            return ConfigSource::Explicit(p);
        }
    }

    let local = PathBuf::from(filename);
    if local.exists() {
        return ConfigSource::CurrentDir(local);
    }

    let xdg_path = get_xdg_config_path(filename);
    if xdg_path.exists() {
        return ConfigSource::XdgConfig(xdg_path);
    }

    let system = PathBuf::from(format!("/etc/{}/{}", APP_NAME, filename));
    if system.exists() {
        return ConfigSource::System(system);
    }

    ConfigSource::Defaults
}

fn get_xdg_config_path(filename: &str) -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join(filename)
}

/// Directory for persistent application data (model bundles, forecast db)
pub fn get_xdg_data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

fn xdg_dir(xdg_var: &str, home_relative: &str) -> PathBuf {
    if let Ok(base) = env::var(xdg_var) {
        PathBuf::from(base).join(APP_NAME)
    } else if let Ok(home) = env::var("HOME") {
        PathBuf::from(home).join(home_relative).join(APP_NAME)
    } else {
        PathBuf::from(home_relative).join(APP_NAME)
    }
}

/// Load and parse a TOML configuration
///
/// Returns `T::default()` when `source` is [`ConfigSource::Defaults`].
pub fn load_config<T: DeserializeOwned + Default>(source: &ConfigSource) -> anyhow::Result<T> {
    match source.path() {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            let config: T = toml::from_str(&content)
                .with_context(|| format!("parsing config file {}", path.display()))?;
            Ok(config)
        }
        None => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        level: Option<String>,
        forecast_days: Option<u32>,
    }

    #[test]
    fn test_config_source_display() {
        let source = ConfigSource::CurrentDir(PathBuf::from("daemon.toml"));
        assert_eq!(format!("{}", source), "daemon.toml");

        let source = ConfigSource::Defaults;
        assert_eq!(format!("{}", source), "(defaults)");
    }

    #[test]
    fn test_load_config_defaults_without_file() {
        let config: Sample = load_config(&ConfigSource::Defaults).unwrap();
        assert_eq!(config, Sample::default());
    }

    #[test]
    fn test_load_config_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.toml");
        fs::write(&path, "level = \"debug\"\nforecast_days = 5\n").unwrap();

        let config: Sample = load_config(&ConfigSource::Explicit(path)).unwrap();
        assert_eq!(config.level.as_deref(), Some("debug"));
        assert_eq!(config.forecast_days, Some(5));
    }

    #[test]
    fn test_load_config_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "forecast_days = [").unwrap();

        let err = load_config::<Sample>(&ConfigSource::Explicit(path)).unwrap_err();
        assert!(err.to_string().contains("parsing config file"));
    }
}
