use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Hold-out evaluation of a fitted model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub r2: f64,
    pub train_samples: usize,
    pub test_samples: usize,
}

impl Metrics {
    pub fn evaluate(
        actual: ArrayView1<f64>,
        predicted: ArrayView1<f64>,
        train_samples: usize,
    ) -> Self {
        let n = actual.len().max(1) as f64;
        let mean = actual.mean().unwrap_or(0.0);

        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        let mut total_sq = 0.0;
        for (a, p) in actual.iter().zip(predicted.iter()) {
            abs_sum += (a - p).abs();
            sq_sum += (a - p).powi(2);
            total_sq += (a - mean).powi(2);
        }

        let mse = sq_sum / n;
        // constant targets: perfect fit scores 1, anything else 0
        let r2 = if total_sq > 0.0 {
            1.0 - sq_sum / total_sq
        } else if sq_sum == 0.0 {
            1.0
        } else {
            0.0
        };
        Self {
            mae: abs_sum / n,
            mse,
            rmse: mse.sqrt(),
            r2,
            train_samples,
            test_samples: actual.len(),
        }
    }
}
