use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;

use super::Regressor;
use crate::{ForecastError, Result};

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

fn dense(x: ArrayView2<f64>) -> DenseMatrix<f64> {
    let rows: Vec<Vec<f64>> = x.rows().into_iter().map(|row| row.to_vec()).collect();
    DenseMatrix::from_2d_vec(&rows)
}

fn failed(e: smartcore::error::Failed) -> ForecastError {
    ForecastError::Fit(format!("random forest: {}", e))
}

fn mean_squared_error(predicted: &[f64], actual: ArrayView1<f64>) -> f64 {
    let n = predicted.len().max(1) as f64;
    predicted
        .iter()
        .zip(actual.iter())
        .map(|(p, a)| (p - a) * (p - a))
        .sum::<f64>()
        / n
}

/// Bagged regression trees from smartcore, every split considering all
/// features.
///
/// Importance is permutation based: the rise in training error when one
/// column is shuffled, normalized to sum to one.
#[derive(Debug, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    seed: u64,
    width: usize,
    forest: Option<Forest>,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn new(params: ForestParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            width: 0,
            forest: None,
            importances: Vec::new(),
        }
    }

    fn parameters(&self, features: usize) -> RandomForestRegressorParameters {
        RandomForestRegressorParameters::default()
            .with_n_trees(self.params.n_trees)
            .with_max_depth(u16::try_from(self.params.max_depth).unwrap_or(u16::MAX))
            .with_min_samples_split(self.params.min_samples_split.max(2))
            .with_min_samples_leaf(self.params.min_samples_leaf.max(1))
            .with_m(features)
            .with_seed(self.seed)
    }

    fn permutation_importance(
        &self,
        forest: &Forest,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<Vec<f64>> {
        let baseline = mean_squared_error(&forest.predict(&dense(x)).map_err(failed)?, y);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut scores = Vec::with_capacity(x.ncols());
        for feature in 0..x.ncols() {
            let mut shuffled = x.to_owned();
            let mut column = shuffled.column(feature).to_vec();
            column.shuffle(&mut rng);
            shuffled.column_mut(feature).assign(&Array1::from(column));

            let predicted = forest.predict(&dense(shuffled.view())).map_err(failed)?;
            scores.push((mean_squared_error(&predicted, y) - baseline).max(0.0));
        }
        let total: f64 = scores.iter().sum();
        if total > 0.0 {
            scores.iter_mut().for_each(|s| *s /= total);
        }
        Ok(scores)
    }
}

impl Regressor for RandomForest {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        if x.nrows() == 0 || x.ncols() == 0 || self.params.n_trees == 0 {
            return Err(ForecastError::InsufficientData(
                "forest needs samples, features and at least one tree".to_string(),
            ));
        }
        let forest = Forest::fit(&dense(x), &y.to_vec(), self.parameters(x.ncols())).map_err(failed)?;
        let importances = self.permutation_importance(&forest, x, y)?;

        self.width = x.ncols();
        self.forest = Some(forest);
        self.importances = importances;
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let forest = self
            .forest
            .as_ref()
            .ok_or_else(|| ForecastError::UntrainedModel("forest prediction".to_string()))?;
        if x.ncols() != self.width {
            return Err(ForecastError::FeatureMismatch(format!(
                "forest was fit on {} columns, got {}",
                self.width,
                x.ncols()
            )));
        }
        if x.nrows() == 0 {
            return Ok(Array1::zeros(0));
        }
        Ok(Array1::from(forest.predict(&dense(x)).map_err(failed)?))
    }

    fn feature_importance(&self) -> Option<Vec<f64>> {
        Some(self.importances.clone())
    }
}
