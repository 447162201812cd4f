//! On-disk model bundles.
//!
//! A bundle is four JSON payloads in a generation directory
//! `<name>-<bundle id>/` plus `<name>_metadata.json` beside it, which names
//! the current generation. Every artifact is wrapped in an envelope carrying
//! the bundle id and model kind so a mix of artifacts from different saves
//! is detected on load.
//!
//! A save writes its payloads into a hidden staging directory, renames it
//! into place and then replaces the metadata file. That last rename is the
//! commit: until it happens the previous generation stays current and
//! loadable. A failed save removes everything it staged.

use std::fs;
use std::path::{Path, PathBuf};

use airq_core::{create_dir_all, replace_file, staging_path, write_staged, write_synced};
use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use super::{Estimator, FittedState, ForecastModel, Metrics, ModelKind, ModelParams, StandardScaler};
use crate::dataset::{CategoricalEncoders, FeatureSchema};
use crate::{ForecastError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePaths {
    pub generation: PathBuf,
    pub estimator: PathBuf,
    pub feature_scaler: PathBuf,
    pub target_scaler: PathBuf,
    pub encoders: PathBuf,
    pub metadata: PathBuf,
}

impl BundlePaths {
    pub fn new(dir: &Path, name: &str, bundle_id: Uuid) -> Self {
        let generation = dir.join(format!("{}-{}", name, bundle_id));
        let artifact = |suffix: &str| generation.join(format!("{}_{}.json", name, suffix));
        Self {
            estimator: artifact("estimator"),
            feature_scaler: artifact("scaler_features"),
            target_scaler: artifact("scaler_target"),
            encoders: artifact("encoders"),
            metadata: Self::metadata_path(dir, name),
            generation,
        }
    }

    /// The file naming the current generation of bundle `name`.
    pub fn metadata_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}_metadata.json", name))
    }

    fn payloads(&self) -> [&Path; 4] {
        [
            &self.estimator,
            &self.feature_scaler,
            &self.target_scaler,
            &self.encoders,
        ]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    bundle_id: Uuid,
    model_kind: ModelKind,
    payload: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub bundle_id: Uuid,
    pub model_kind: ModelKind,
    pub version: String,
    pub feature_columns: Vec<String>,
    pub metrics: Option<Metrics>,
    pub created_at: String,
}

fn encode<T: Serialize>(bundle_id: Uuid, model_kind: ModelKind, payload: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(&Envelope {
        bundle_id,
        model_kind,
        payload,
    })?)
}

fn read_metadata(path: &Path) -> Result<BundleMetadata> {
    Ok(read_artifact::<BundleMetadata>(path)?.payload)
}

fn remove_staged_dir(path: &Path) {
    if path.is_dir() {
        if let Err(e) = fs::remove_dir_all(path) {
            warn!("failed to remove {}: {}", path.display(), e);
        }
    }
}

pub(super) fn save(model: &ForecastModel, dir: &Path, name: &str) -> Result<BundleMetadata> {
    let state = model.fitted("saving")?;
    let bundle_id = Uuid::now_v7();
    let kind = model.kind;
    let paths = BundlePaths::new(dir, name, bundle_id);

    let metadata = BundleMetadata {
        bundle_id,
        model_kind: kind,
        version: model.version.clone(),
        feature_columns: state.schema.names(),
        metrics: state.metrics,
        created_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
    };
    let payloads = [
        encode(bundle_id, kind, &state.estimator)?,
        encode(bundle_id, kind, &state.feature_scaler)?,
        encode(bundle_id, kind, &state.target_scaler)?,
        encode(bundle_id, kind, &state.encoders)?,
    ];
    let metadata_bytes = encode(bundle_id, kind, &metadata)?;

    let previous = if paths.metadata.exists() {
        match read_metadata(&paths.metadata) {
            Ok(previous) => Some(previous.bundle_id),
            Err(e) => {
                warn!("replacing unreadable bundle metadata {}: {}", paths.metadata.display(), e);
                None
            }
        }
    } else {
        None
    };

    let staging = staging_path(&paths.generation);
    if let Err(e) = publish(&paths, &staging, &payloads, &metadata_bytes) {
        remove_staged_dir(&staging);
        remove_staged_dir(&paths.generation);
        let staged_metadata = staging_path(&paths.metadata);
        if staged_metadata.is_file() {
            if let Err(cleanup) = fs::remove_file(&staged_metadata) {
                warn!("failed to remove {}: {}", staged_metadata.display(), cleanup);
            }
        }
        return Err(e);
    }

    if let Some(previous) = previous.filter(|id| *id != bundle_id) {
        remove_staged_dir(&BundlePaths::new(dir, name, previous).generation);
    }
    info!(
        "saved {} model bundle '{}' ({}) to {}",
        kind,
        name,
        bundle_id,
        dir.display()
    );
    Ok(metadata)
}

/// Write the generation under `staging`, move it into place, then commit
/// by replacing the metadata file.
fn publish(paths: &BundlePaths, staging: &Path, payloads: &[Vec<u8>; 4], metadata: &[u8]) -> Result<()> {
    create_dir_all(staging)?;
    for (target, bytes) in paths.payloads().into_iter().zip(payloads) {
        let file_name = target
            .file_name()
            .ok_or_else(|| ForecastError::Bundle(format!("bad artifact path {}", target.display())))?;
        write_synced(&staging.join(file_name), bytes)?;
    }
    fs::rename(staging, &paths.generation)?;
    debug!("staged generation {}", paths.generation.display());

    let staged = write_staged(&paths.metadata, metadata)?;
    replace_file(&staged, &paths.metadata)?;
    Ok(())
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<Envelope<T>> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ForecastError::Bundle(format!("unreadable artifact {}: {}", path.display(), e))
    })
}

fn check_envelope<T>(envelope: &Envelope<T>, metadata: &BundleMetadata, path: &Path) -> Result<()> {
    if envelope.bundle_id != metadata.bundle_id || envelope.model_kind != metadata.model_kind {
        return Err(ForecastError::Bundle(format!(
            "{} belongs to bundle {} ({}), metadata describes {} ({})",
            path.display(),
            envelope.bundle_id,
            envelope.model_kind,
            metadata.bundle_id,
            metadata.model_kind
        )));
    }
    Ok(())
}

pub(super) fn load(dir: &Path, name: &str, params: ModelParams) -> Result<ForecastModel> {
    let metadata_path = BundlePaths::metadata_path(dir, name);
    if !metadata_path.exists() {
        return Err(ForecastError::UntrainedModel(format!(
            "loading: no bundle '{}' in {}",
            name,
            dir.display()
        )));
    }
    let metadata = read_metadata(&metadata_path)?;
    let paths = BundlePaths::new(dir, name, metadata.bundle_id);
    if let Some(missing) = paths.payloads().into_iter().find(|p| !p.exists()) {
        return Err(ForecastError::Bundle(format!(
            "bundle '{}' is missing {}",
            name,
            missing.display()
        )));
    }

    let estimator = read_artifact::<Estimator>(&paths.estimator)?;
    check_envelope(&estimator, &metadata, &paths.estimator)?;
    let feature_scaler = read_artifact::<StandardScaler>(&paths.feature_scaler)?;
    check_envelope(&feature_scaler, &metadata, &paths.feature_scaler)?;
    let target_scaler = read_artifact::<Option<StandardScaler>>(&paths.target_scaler)?;
    check_envelope(&target_scaler, &metadata, &paths.target_scaler)?;
    let encoders = read_artifact::<CategoricalEncoders>(&paths.encoders)?;
    check_envelope(&encoders, &metadata, &paths.encoders)?;

    let estimator = estimator.payload;
    if estimator.kind() != metadata.model_kind {
        return Err(ForecastError::Bundle(format!(
            "estimator format is {}, metadata says {}",
            estimator.kind(),
            metadata.model_kind
        )));
    }
    let target_scaler = target_scaler.payload;
    if estimator.regressor().scales_target() != target_scaler.is_some() {
        return Err(ForecastError::Bundle(format!(
            "{} estimator and target scaler disagree",
            metadata.model_kind
        )));
    }
    let schema = FeatureSchema::from_names(&metadata.feature_columns)?;
    let feature_scaler = feature_scaler.payload;
    if feature_scaler.width() != schema.len() {
        return Err(ForecastError::FeatureMismatch(format!(
            "feature scaler has {} columns, bundle lists {}",
            feature_scaler.width(),
            schema.len()
        )));
    }

    debug!("loaded bundle {} created {}", metadata.bundle_id, metadata.created_at);
    info!(
        "loaded {} model '{}' v{} with {} features",
        metadata.model_kind,
        name,
        metadata.version,
        schema.len()
    );
    Ok(ForecastModel {
        kind: metadata.model_kind,
        version: metadata.version,
        params,
        fitted: Some(FittedState {
            estimator,
            feature_scaler,
            target_scaler,
            encoders: encoders.payload,
            schema,
            metrics: metadata.metrics,
        }),
    })
}
