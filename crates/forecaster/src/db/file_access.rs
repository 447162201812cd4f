use std::fs;
use std::path::{Path, PathBuf};

use log::trace;
use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
};

/// Which dataset a parquet file holds; also the file name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Pollutants,
    Weather,
    Forecasts,
}

impl DataKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DataKind::Pollutants => "pollutants",
            DataKind::Weather => "weather",
            DataKind::Forecasts => "forecasts",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileParams {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
    pub kind: Option<DataKind>,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to format time string: {0}")]
    TimeFormat(#[from] time::error::Format),
    #[error("Failed to parse time string: {0}")]
    TimeParse(#[from] time::error::Parse),
    #[error("Unexpected file name: {0}")]
    FileName(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parquet files laid out as `<data_dir>/<YYYY-MM-DD>/<kind>_<rfc3339>.parquet`.
#[derive(Debug, Clone)]
pub struct FileAccess {
    data_dir: PathBuf,
}

impl FileAccess {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path for a new file of `kind` generated at `generated_at`; the dated
    /// folder is created if needed.
    pub fn new_file_path(&self, kind: DataKind, generated_at: OffsetDateTime) -> Result<PathBuf, Error> {
        let folder = self.data_dir.join(generated_at.date().to_string());
        airq_core::create_dir_all(&folder)?;
        let file_name = format!("{}_{}.parquet", kind.prefix(), generated_at.format(&Rfc3339)?);
        Ok(folder.join(file_name))
    }

    /// Full paths of every file matching `params`, oldest folder first.
    pub fn grab_file_paths(&self, params: &FileParams) -> Result<Vec<String>, Error> {
        let mut file_paths = vec![];
        let Ok(entries) = fs::read_dir(&self.data_dir) else {
            return Ok(file_paths);
        };
        let mut folders: Vec<(Date, PathBuf)> = vec![];
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Ok(folder_date) = Date::parse(&name, format_description!("[year]-[month]-[day]"))
            else {
                trace!("skipping non-dated folder {}", path.display());
                continue;
            };
            if is_date_in_range(folder_date, params) {
                folders.push((folder_date, path));
            }
        }
        folders.sort();

        for (_, folder) in folders {
            let mut names = vec![];
            for entry in fs::read_dir(&folder)?.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    if matches_file_params(name, params)? {
                        names.push(name.to_owned());
                    }
                }
            }
            names.sort();
            file_paths.extend(
                names
                    .into_iter()
                    .map(|name| folder.join(name).to_string_lossy().into_owned()),
            );
        }
        Ok(file_paths)
    }
}

pub fn drop_suffix(input: &str, suffix: &str) -> String {
    input.strip_suffix(suffix).unwrap_or(input).to_string()
}

fn is_date_in_range(compare_to: Date, params: &FileParams) -> bool {
    let after_start = params
        .start
        .map(|start| compare_to >= start.date())
        .unwrap_or(true);
    let before_end = params
        .end
        .map(|end| compare_to <= end.date())
        .unwrap_or(true);
    after_start && before_end
}

fn is_time_in_range(compare_to: OffsetDateTime, params: &FileParams) -> bool {
    let after_start = params.start.map(|start| compare_to >= start).unwrap_or(true);
    let before_end = params.end.map(|end| compare_to <= end).unwrap_or(true);
    after_start && before_end
}

/// Whether `filename` has the requested kind and a generation time in range.
fn matches_file_params(filename: &str, params: &FileParams) -> Result<bool, Error> {
    if !filename.ends_with(".parquet") {
        return Ok(false);
    }
    let Some((file_kind, created)) = filename.split_once('_') else {
        return Err(Error::FileName(filename.to_string()));
    };
    let created_time = drop_suffix(created, ".parquet");
    trace!("parsed file type:{} time:{}", file_kind, created_time);
    let file_generated_at = OffsetDateTime::parse(&created_time, &Rfc3339)?;

    let kind_matches = params.kind.map_or(true, |kind| kind.prefix() == file_kind);
    Ok(kind_matches && is_time_in_range(file_generated_at, params))
}
