use linfa::Dataset;
use linfa_linear::{FittedLinearRegression, LinearError, LinearRegression};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::Regressor;
use crate::{ForecastError, Result};

/// Share of a column's variance that must survive projection onto the
/// earlier columns for it to count as independent.
const DEPENDENCE_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearParams {
    pub fit_intercept: bool,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self {
            fit_intercept: true,
        }
    }
}

/// Ordinary least squares through linfa.
///
/// Only linearly independent input columns reach the solver and the others
/// keep a zero weight: constant or duplicated columns leave the normal
/// equations singular.
#[derive(Debug, Serialize, Deserialize)]
pub struct LinearRegressor {
    params: LinearParams,
    width: usize,
    active: Vec<usize>,
    fitted: Option<FittedLinearRegression<f64>>,
}

impl LinearRegressor {
    pub fn new(params: LinearParams) -> Self {
        Self {
            params,
            width: 0,
            active: Vec::new(),
            fitted: None,
        }
    }

    /// Weight per input column, zero for columns left out of the fit.
    pub fn coefficients(&self) -> Array1<f64> {
        let mut weights = Array1::zeros(self.width);
        if let Some(fitted) = &self.fitted {
            for (&column, &weight) in self.active.iter().zip(fitted.params()) {
                weights[column] = weight;
            }
        }
        weights
    }

    pub fn intercept(&self) -> f64 {
        self.fitted.as_ref().map_or(0.0, |f| f.intercept())
    }
}

/// Greedy Gram-Schmidt pass keeping columns that add a new direction.
fn independent_columns(x: ArrayView2<f64>, center: bool) -> Vec<usize> {
    let mut basis: Vec<Array1<f64>> = Vec::new();
    let mut active = Vec::new();
    for (index, column) in x.axis_iter(Axis(1)).enumerate() {
        let mut v = column.to_owned();
        if center {
            if let Some(mean) = v.mean() {
                v -= mean;
            }
        }
        let norm = v.dot(&v);
        if norm <= f64::EPSILON {
            continue;
        }
        for b in &basis {
            let projection = v.dot(b);
            v.scaled_add(-projection, b);
        }
        let residual = v.dot(&v);
        if residual > DEPENDENCE_TOLERANCE * norm {
            basis.push(v / residual.sqrt());
            active.push(index);
        }
    }
    active
}

impl Regressor for LinearRegressor {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        use linfa::traits::Fit;

        if x.nrows() == 0 {
            return Err(ForecastError::InsufficientData(
                "linear fit needs at least one sample".to_string(),
            ));
        }
        let active = independent_columns(x, self.params.fit_intercept);
        if active.is_empty() {
            return Err(ForecastError::Fit(
                "no feature column varies across the training rows".to_string(),
            ));
        }

        let dataset = Dataset::new(x.select(Axis(1), &active), y.to_owned());
        let fitted = LinearRegression::default()
            .with_intercept(self.params.fit_intercept)
            .fit(&dataset)
            .map_err(|e: LinearError<f64>| ForecastError::Fit(format!("linear regression: {}", e)))?;

        self.width = x.ncols();
        self.active = active;
        self.fitted = Some(fitted);
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        use linfa::traits::Predict;

        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| ForecastError::UntrainedModel("linear prediction".to_string()))?;
        if x.ncols() != self.width {
            return Err(ForecastError::FeatureMismatch(format!(
                "linear model was fit on {} columns, got {}",
                self.width,
                x.ncols()
            )));
        }
        Ok(fitted.predict(&x.select(Axis(1), &self.active)))
    }
}
