use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::{ForecastError, Result};

/// Column-wise z-score normalization: `(x - mean) / scale`.
///
/// Columns with zero variance get a scale of 1 so they transform to zero
/// instead of dividing by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    const EPSILON: f64 = 1e-12;

    pub fn fit(x: ArrayView2<f64>) -> Result<Self> {
        if x.nrows() == 0 {
            return Err(ForecastError::InsufficientData(
                "cannot fit scaler on zero rows".to_string(),
            ));
        }
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| ForecastError::InsufficientData("empty feature matrix".to_string()))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s < Self::EPSILON { 1.0 } else { s });
        Ok(Self { mean, scale })
    }

    /// Fit on a single column, used for target scaling.
    pub fn fit_column(y: ArrayView1<f64>) -> Result<Self> {
        let column = y.insert_axis(Axis(1));
        Self::fit(column)
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.width() {
            return Err(ForecastError::FeatureMismatch(format!(
                "scaler fitted on {} columns, got {}",
                self.width(),
                x.ncols()
            )));
        }
        Ok((&x - &self.mean) / &self.scale)
    }

    pub fn transform_column(&self, y: ArrayView1<f64>) -> Result<Array1<f64>> {
        let scaled = self.transform(y.insert_axis(Axis(1)))?;
        Ok(scaled.column(0).to_owned())
    }

    pub fn inverse_column(&self, y: ArrayView1<f64>) -> Array1<f64> {
        let mean = self.mean.first().copied().unwrap_or(0.0);
        let scale = self.scale.first().copied().unwrap_or(1.0);
        y.mapv(|v| v * scale + mean)
    }
}
