//! Trainable AQI regressors behind a single model type.
//!
//! [`ForecastModel`] owns the fit/predict contract (split, scaling,
//! metrics, non-negative output, persistence); the variant-specific learning
//! lives in [`Estimator`], one [`Regressor`] per model family.

mod bundle;
mod forest;
mod linear;
mod metrics;
mod scaler;
mod sequence;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use log::info;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::dataset::{CategoricalEncoders, FeatureSchema, TrainingSet};
use crate::features::FeatureRow;
use crate::{ForecastError, Result};

pub use bundle::{BundleMetadata, BundlePaths};
pub use forest::{ForestParams, RandomForest};
pub use linear::{LinearParams, LinearRegressor};
pub use metrics::Metrics;
pub use scaler::StandardScaler;
pub use sequence::{to_sequences, SequenceParams, SequenceRegressor};

pub const DEFAULT_MODEL_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    #[default]
    RandomForest,
    #[serde(alias = "lstm")]
    Sequence,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::RandomForest => "random_forest",
            ModelKind::Sequence => "sequence",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(ModelKind::Linear),
            "random_forest" | "forest" => Ok(ModelKind::RandomForest),
            "sequence" | "lstm" => Ok(ModelKind::Sequence),
            other => Err(format!("unknown model kind '{}'", other)),
        }
    }
}

/// Hyper-parameters for every variant plus the hold-out split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub linear: LinearParams,
    pub forest: ForestParams,
    pub sequence: SequenceParams,
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            linear: LinearParams::default(),
            forest: ForestParams::default(),
            sequence: SequenceParams::default(),
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

/// What a model family has to provide. Inputs are already standardized.
pub trait Regressor {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()>;

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>>;

    /// Whether targets must be standardized before `fit` and restored after
    /// `predict`.
    fn scales_target(&self) -> bool {
        false
    }

    /// Normalized importance per input column, if the family has one.
    fn feature_importance(&self) -> Option<Vec<f64>> {
        None
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    Linear(LinearRegressor),
    RandomForest(RandomForest),
    Sequence(SequenceRegressor),
}

impl Estimator {
    pub fn new(kind: ModelKind, params: &ModelParams) -> Self {
        match kind {
            ModelKind::Linear => Estimator::Linear(LinearRegressor::new(params.linear)),
            ModelKind::RandomForest => {
                Estimator::RandomForest(RandomForest::new(params.forest, params.seed))
            }
            ModelKind::Sequence => {
                Estimator::Sequence(SequenceRegressor::new(params.sequence, params.seed))
            }
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Estimator::Linear(_) => ModelKind::Linear,
            Estimator::RandomForest(_) => ModelKind::RandomForest,
            Estimator::Sequence(_) => ModelKind::Sequence,
        }
    }

    pub fn regressor(&self) -> &dyn Regressor {
        match self {
            Estimator::Linear(m) => m,
            Estimator::RandomForest(m) => m,
            Estimator::Sequence(m) => m,
        }
    }

    fn regressor_mut(&mut self) -> &mut dyn Regressor {
        match self {
            Estimator::Linear(m) => m,
            Estimator::RandomForest(m) => m,
            Estimator::Sequence(m) => m,
        }
    }
}

/// Everything produced by one successful `fit`; replaced as a whole.
#[derive(Debug)]
struct FittedState {
    estimator: Estimator,
    feature_scaler: StandardScaler,
    target_scaler: Option<StandardScaler>,
    encoders: CategoricalEncoders,
    schema: FeatureSchema,
    metrics: Option<Metrics>,
}

impl FittedState {
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        self.schema.check_width(x.ncols())?;
        let scaled = self.feature_scaler.transform(x)?;
        let raw = self.estimator.regressor().predict(scaled.view())?;
        let restored = match &self.target_scaler {
            Some(scaler) => scaler.inverse_column(raw.view()),
            None => raw,
        };
        Ok(restored)
    }
}

#[derive(Debug)]
pub struct ForecastModel {
    kind: ModelKind,
    version: String,
    params: ModelParams,
    fitted: Option<FittedState>,
}

impl ForecastModel {
    pub fn new(kind: ModelKind, params: ModelParams) -> Self {
        Self {
            kind,
            version: DEFAULT_MODEL_VERSION.to_string(),
            params,
            fitted: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn schema(&self) -> Option<&FeatureSchema> {
        self.fitted.as_ref().map(|f| &f.schema)
    }

    pub fn metrics(&self) -> Option<Metrics> {
        self.fitted.as_ref().and_then(|f| f.metrics)
    }

    fn fitted(&self, action: &str) -> Result<&FittedState> {
        self.fitted
            .as_ref()
            .ok_or_else(|| ForecastError::UntrainedModel(action.to_string()))
    }

    /// Train on `set` and evaluate on a seeded hold-out partition.
    ///
    /// Fitted state is only replaced once training has fully succeeded.
    pub fn fit(&mut self, set: &TrainingSet) -> Result<Metrics> {
        let n = set.len();
        if n < 2 || set.schema.is_empty() {
            return Err(ForecastError::InsufficientData(format!(
                "need at least 2 examples with features to fit, got {} examples and {} columns",
                n,
                set.schema.len()
            )));
        }
        let (train_idx, test_idx) = split_indices(n, self.params.test_fraction, self.params.seed);
        let x_train = set.features.select(Axis(0), &train_idx);
        let x_test = set.features.select(Axis(0), &test_idx);
        let y_train = set.targets.select(Axis(0), &train_idx);
        let y_test = set.targets.select(Axis(0), &test_idx);

        let feature_scaler = StandardScaler::fit(x_train.view())?;
        let xs_train = feature_scaler.transform(x_train.view())?;

        let mut estimator = Estimator::new(self.kind, &self.params);
        let target_scaler = if estimator.regressor().scales_target() {
            Some(StandardScaler::fit_column(y_train.view())?)
        } else {
            None
        };
        let y_fit = match &target_scaler {
            Some(scaler) => scaler.transform_column(y_train.view())?,
            None => y_train,
        };
        estimator.regressor_mut().fit(xs_train.view(), y_fit.view())?;

        let mut state = FittedState {
            estimator,
            feature_scaler,
            target_scaler,
            encoders: set.encoders.clone(),
            schema: set.schema.clone(),
            metrics: None,
        };
        let predicted = state.predict(x_test.view())?;
        let metrics = Metrics::evaluate(y_test.view(), predicted.view(), train_idx.len());
        state.metrics = Some(metrics);

        info!(
            "trained {} model on {} samples ({} held out): mae={:.3} rmse={:.3} r2={:.3}",
            self.kind,
            metrics.train_samples,
            metrics.test_samples,
            metrics.mae,
            metrics.rmse,
            metrics.r2
        );
        self.fitted = Some(state);
        Ok(metrics)
    }

    /// Predict AQI for rows laid out in the fitted schema; never negative.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let state = self.fitted("prediction")?;
        Ok(state.predict(x)?.mapv(|v| v.max(0.0)))
    }

    pub fn predict_vector(&self, features: &[f64]) -> Result<f64> {
        let state = self.fitted("prediction")?;
        state.schema.check_width(features.len())?;
        let x = Array2::from_shape_vec((1, features.len()), features.to_vec())
            .map_err(|e| ForecastError::FeatureMismatch(e.to_string()))?;
        Ok(self.predict(x.view())?[0])
    }

    /// Predict from a feature row, rebuilding its vector in schema order.
    pub fn predict_row(&self, row: &FeatureRow) -> Result<f64> {
        let state = self.fitted("prediction")?;
        let vector = state.schema.vector(row, &state.encoders);
        self.predict_vector(&vector)
    }

    /// (feature name, importance) sorted descending, `None` for families
    /// without importances.
    pub fn feature_importance(&self) -> Result<Option<Vec<(String, f64)>>> {
        let state = self.fitted("feature importance")?;
        let Some(scores) = state.estimator.regressor().feature_importance() else {
            return Ok(None);
        };
        let mut ranked: Vec<(String, f64)> = state.schema.names().into_iter().zip(scores).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(Some(ranked))
    }

    pub fn save(&self, dir: &Path, name: &str) -> Result<BundleMetadata> {
        bundle::save(self, dir, name)
    }

    /// Restore a saved model; `params` only matter for a later re-fit.
    pub fn load(dir: &Path, name: &str, params: ModelParams) -> Result<Self> {
        bundle::load(dir, name, params)
    }
}

/// Shuffled (train, test) indices; the test side gets `ceil(n * fraction)`
/// rows, bounded so neither side is empty.
fn split_indices(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_len = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n.saturating_sub(1).max(1));
    let train = indices.split_off(test_len);
    (train, indices)
}
