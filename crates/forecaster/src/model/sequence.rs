//! Single-layer LSTM regressor over a one-step window.
//!
//! Each feature vector is treated as a sequence of length one, so the cell
//! always starts from zero hidden and cell state and the forget gate has
//! nothing to act on. What remains is the input, candidate and output gates
//! followed by a dense output unit, trained with Adam on mean squared error.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::Regressor;
use crate::{ForecastError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceParams {
    pub hidden_units: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

impl Default for SequenceParams {
    fn default() -> Self {
        Self {
            hidden_units: 16,
            epochs: 50,
            batch_size: 32,
            learning_rate: 0.01,
        }
    }
}

const PARAM_COUNT: usize = 8;

/// Every tensor is 2-d so they can be updated uniformly: kernels are
/// (features, hidden), biases (1, hidden), the dense layer (hidden, 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LstmWeights {
    kernel_input: Array2<f64>,
    kernel_candidate: Array2<f64>,
    kernel_output: Array2<f64>,
    bias_input: Array2<f64>,
    bias_candidate: Array2<f64>,
    bias_output: Array2<f64>,
    dense: Array2<f64>,
    dense_bias: Array2<f64>,
}

impl LstmWeights {
    fn init(features: usize, hidden: usize, rng: &mut StdRng) -> Self {
        let mut glorot = |rows: usize, cols: usize| {
            let limit = (6.0 / (rows + cols) as f64).sqrt();
            Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
        };
        Self {
            kernel_input: glorot(features, hidden),
            kernel_candidate: glorot(features, hidden),
            kernel_output: glorot(features, hidden),
            bias_input: Array2::zeros((1, hidden)),
            bias_candidate: Array2::zeros((1, hidden)),
            bias_output: Array2::zeros((1, hidden)),
            dense: glorot(hidden, 1),
            dense_bias: Array2::zeros((1, 1)),
        }
    }

    fn tensors_mut(&mut self) -> [&mut Array2<f64>; PARAM_COUNT] {
        [
            &mut self.kernel_input,
            &mut self.kernel_candidate,
            &mut self.kernel_output,
            &mut self.bias_input,
            &mut self.bias_candidate,
            &mut self.bias_output,
            &mut self.dense,
            &mut self.dense_bias,
        ]
    }

    fn features(&self) -> usize {
        self.kernel_input.nrows()
    }

    fn forward(&self, x: ArrayView2<f64>) -> Activations {
        let input = (x.dot(&self.kernel_input) + &self.bias_input).mapv(sigmoid);
        let candidate = (x.dot(&self.kernel_candidate) + &self.bias_candidate).mapv(f64::tanh);
        let output = (x.dot(&self.kernel_output) + &self.bias_output).mapv(sigmoid);
        let cell_tanh = (&input * &candidate).mapv(f64::tanh);
        let hidden = &output * &cell_tanh;
        let prediction = hidden.dot(&self.dense) + &self.dense_bias;
        Activations {
            input,
            candidate,
            output,
            cell_tanh,
            hidden,
            prediction,
        }
    }

    /// Gradients of mean squared error w.r.t. every tensor, same order as
    /// [`LstmWeights::tensors_mut`].
    fn gradients(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> [Array2<f64>; PARAM_COUNT] {
        let act = self.forward(x);
        let n = x.nrows() as f64;

        let residual = &act.prediction - &y.insert_axis(Axis(1));
        let d_pred = residual.mapv(|r| 2.0 * r / n);

        let d_dense = act.hidden.t().dot(&d_pred);
        let d_dense_bias = d_pred.sum_axis(Axis(0)).insert_axis(Axis(0));
        let d_hidden = d_pred.dot(&self.dense.t());

        let d_output = &d_hidden * &act.cell_tanh;
        let d_cell = &d_hidden * &act.output * &act.cell_tanh.mapv(|t| 1.0 - t * t);
        let d_input = &d_cell * &act.candidate;
        let d_candidate = &d_cell * &act.input;

        let z_input = d_input * &act.input.mapv(|s| s * (1.0 - s));
        let z_candidate = d_candidate * &act.candidate.mapv(|t| 1.0 - t * t);
        let z_output = d_output * &act.output.mapv(|s| s * (1.0 - s));

        let bias = |z: &Array2<f64>| z.sum_axis(Axis(0)).insert_axis(Axis(0));
        [
            x.t().dot(&z_input),
            x.t().dot(&z_candidate),
            x.t().dot(&z_output),
            bias(&z_input),
            bias(&z_candidate),
            bias(&z_output),
            d_dense,
            d_dense_bias,
        ]
    }
}

struct Activations {
    input: Array2<f64>,
    candidate: Array2<f64>,
    output: Array2<f64>,
    cell_tanh: Array2<f64>,
    hidden: Array2<f64>,
    prediction: Array2<f64>,
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

struct Adam {
    learning_rate: f64,
    step: i32,
    first: Vec<Array2<f64>>,
    second: Vec<Array2<f64>>,
}

impl Adam {
    const BETA1: f64 = 0.9;
    const BETA2: f64 = 0.999;
    const EPSILON: f64 = 1e-7;

    fn new(weights: &mut LstmWeights, learning_rate: f64) -> Self {
        let zeros: Vec<Array2<f64>> = weights
            .tensors_mut()
            .iter()
            .map(|t| Array2::zeros(t.raw_dim()))
            .collect();
        Self {
            learning_rate,
            step: 0,
            first: zeros.clone(),
            second: zeros,
        }
    }

    fn update(&mut self, weights: &mut LstmWeights, gradients: [Array2<f64>; PARAM_COUNT]) {
        self.step += 1;
        let correction1 = 1.0 - Self::BETA1.powi(self.step);
        let correction2 = 1.0 - Self::BETA2.powi(self.step);
        let lr = self.learning_rate;

        for (k, (param, grad)) in weights.tensors_mut().into_iter().zip(gradients).enumerate() {
            let m = &mut self.first[k];
            let v = &mut self.second[k];
            ndarray::Zip::from(param)
                .and(m)
                .and(v)
                .and(&grad)
                .for_each(|p, m, v, &g| {
                    *m = Self::BETA1 * *m + (1.0 - Self::BETA1) * g;
                    *v = Self::BETA2 * *v + (1.0 - Self::BETA2) * g * g;
                    let m_hat = *m / correction1;
                    let v_hat = *v / correction2;
                    *p -= lr * m_hat / (v_hat.sqrt() + Self::EPSILON);
                });
        }
    }
}

/// (samples, features) -> (samples, 1, features)
pub fn to_sequences(x: ArrayView2<f64>) -> Array3<f64> {
    x.insert_axis(Axis(1)).to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRegressor {
    params: SequenceParams,
    seed: u64,
    weights: Option<LstmWeights>,
}

impl SequenceRegressor {
    pub fn new(params: SequenceParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            weights: None,
        }
    }

    fn last_step(sequences: &Array3<f64>) -> ArrayView2<f64> {
        let steps = sequences.len_of(Axis(1));
        sequences.index_axis(Axis(1), steps.saturating_sub(1))
    }
}

impl Regressor for SequenceRegressor {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        let n = x.nrows();
        if n == 0 || self.params.hidden_units == 0 {
            return Err(ForecastError::InsufficientData(
                "sequence model needs samples and hidden units".to_string(),
            ));
        }
        let sequences = to_sequences(x);
        let steps = Self::last_step(&sequences);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut weights = LstmWeights::init(x.ncols(), self.params.hidden_units, &mut rng);
        let mut adam = Adam::new(&mut weights, self.params.learning_rate);
        let batch_size = self.params.batch_size.max(1);

        let mut order: Vec<usize> = (0..n).collect();
        for _ in 0..self.params.epochs {
            order.shuffle(&mut rng);
            for batch in order.chunks(batch_size) {
                let xb = steps.select(Axis(0), batch);
                let yb = y.select(Axis(0), batch);
                let gradients = weights.gradients(xb.view(), yb.view());
                adam.update(&mut weights, gradients);
            }
        }
        self.weights = Some(weights);
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        Ok(match &self.weights {
            Some(weights) if weights.features() == x.ncols() => {
                let sequences = to_sequences(x);
                weights
                    .forward(Self::last_step(&sequences))
                    .prediction
                    .column(0)
                    .to_owned()
            }
            _ => Array1::zeros(x.nrows()),
        })
    }

    fn scales_target(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn linear_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((64, 2), |(i, j)| {
            let t = i as f64 / 32.0 - 1.0;
            if j == 0 {
                t
            } else {
                (i % 5) as f64 / 5.0 - 0.4
            }
        });
        let y = x.column(0).mapv(|v| 0.8 * v);
        (x, y)
    }

    fn mse(model: &SequenceRegressor, x: &Array2<f64>, y: &Array1<f64>) -> f64 {
        let residual = model.predict(x.view()).unwrap() - y;
        residual.mapv(|r| r * r).mean().unwrap()
    }

    #[test]
    fn reshapes_to_one_step_windows() {
        let x = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let seq = to_sequences(x.view());
        assert_eq!(seq.shape(), &[2, 1, 3]);
        assert_eq!(seq[[1, 0, 2]], 6.0);
    }

    #[test]
    fn training_reduces_error() {
        let (x, y) = linear_data();
        let baseline = y.mapv(|v| v * v).mean().unwrap();

        let params = SequenceParams {
            epochs: 300,
            ..Default::default()
        };
        let mut model = SequenceRegressor::new(params, 42);
        model.fit(x.view(), y.view()).unwrap();
        assert!(mse(&model, &x, &y) < baseline / 4.0);
        assert!(model.scales_target());
    }

    #[test]
    fn gradients_match_finite_differences() {
        let (x, y) = linear_data();
        let mut rng = StdRng::seed_from_u64(3);
        let weights = LstmWeights::init(2, 4, &mut rng);
        let analytic = weights.gradients(x.view(), y.view());

        let loss = |w: &LstmWeights| {
            let pred = w.forward(x.view()).prediction.column(0).to_owned();
            (pred - &y).mapv(|r| r * r).mean().unwrap()
        };
        let h = 1e-6;
        for k in 0..PARAM_COUNT {
            let mut plus = weights.clone();
            plus.tensors_mut()[k][[0, 0]] += h;
            let mut minus = weights.clone();
            minus.tensors_mut()[k][[0, 0]] -= h;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * h);
            assert!(
                (numeric - analytic[k][[0, 0]]).abs() < 1e-5,
                "tensor {}: numeric {} analytic {}",
                k,
                numeric,
                analytic[k][[0, 0]]
            );
        }
    }

    #[test]
    fn unfitted_model_predicts_zero() {
        let model = SequenceRegressor::new(SequenceParams::default(), 1);
        assert_eq!(model.predict(array![[1.0, 2.0]].view()).unwrap().to_vec(), vec![0.0]);
    }
}
