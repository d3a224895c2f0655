//! Multilayer perceptron classifier.
//!
//! Fully connected hidden layers with a single logistic output unit trained on
//! binary cross-entropy with Adam and L2 regularization. Each mini-batch is cut
//! into fixed-size chunks whose gradients are computed on a rayon pool and summed
//! in chunk order, so the fitted weights do not depend on the pool size.

use super::classifier::Classifier;
use crate::config::MlpConfig;
use crate::domain::errors::{MlError, MlResult};
use crate::domain::ml::Direction;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip, s};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

const GRADIENT_CHUNK_ROWS: usize = 32;
const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;
const PROB_CLIP: f64 = 1e-15;

/// Hidden layer activation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Identity,
    Logistic,
    Tanh,
    Relu,
}

impl Activation {
    fn apply(self, z: &mut Array2<f64>) {
        match self {
            Activation::Identity => {}
            Activation::Logistic => z.mapv_inplace(sigmoid),
            Activation::Tanh => z.mapv_inplace(f64::tanh),
            Activation::Relu => z.mapv_inplace(|v| v.max(0.0)),
        }
    }

    /// Derivative expressed through the activation output `a`.
    fn derivative(self, a: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Identity => Array2::ones(a.raw_dim()),
            Activation::Logistic => a.mapv(|v| v * (1.0 - v)),
            Activation::Tanh => a.mapv(|v| 1.0 - v * v),
            Activation::Relu => a.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
        }
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "identity" => Ok(Activation::Identity),
            "logistic" | "sigmoid" => Ok(Activation::Logistic),
            "tanh" => Ok(Activation::Tanh),
            "relu" => Ok(Activation::Relu),
            _ => Err(format!(
                "Invalid activation: {}. Must be 'identity', 'logistic', 'tanh' or 'relu'",
                s
            )),
        }
    }
}

fn sigmoid(v: f64) -> f64 {
    if v >= 0.0 {
        1.0 / (1.0 + (-v).exp())
    } else {
        let e = v.exp();
        e / (1.0 + e)
    }
}

/// One hidden unit layer per entry; defaults to `floor(sqrt(n_inputs * 2))` units.
pub fn hidden_layer_sizes(config: &MlpConfig, n_inputs: usize) -> Vec<usize> {
    if config.hidden_layer_sizes.is_empty() {
        let size = ((n_inputs * 2) as f64).sqrt().floor() as usize;
        vec![size.max(1)]
    } else {
        config.hidden_layer_sizes.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DenseLayer {
    weights: Array2<f64>,
    biases: Array1<f64>,
}

impl DenseLayer {
    fn glorot(fan_in: usize, fan_out: usize, factor: f64, rng: &mut StdRng) -> Self {
        let bound = (factor / (fan_in + fan_out) as f64).sqrt();
        let weights =
            Array2::from_shape_fn((fan_in, fan_out), |_| rng.random_range(-bound..bound));
        let biases = Array1::from_shape_fn(fan_out, |_| rng.random_range(-bound..bound));
        Self { weights, biases }
    }
}

struct Gradients {
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
    loss: f64,
}

impl Gradients {
    fn zeros(layers: &[DenseLayer]) -> Self {
        Self {
            weights: layers
                .iter()
                .map(|l| Array2::zeros(l.weights.raw_dim()))
                .collect(),
            biases: layers
                .iter()
                .map(|l| Array1::zeros(l.biases.raw_dim()))
                .collect(),
            loss: 0.0,
        }
    }

    fn accumulate(&mut self, other: &Gradients) {
        for (acc, g) in self.weights.iter_mut().zip(&other.weights) {
            *acc += g;
        }
        for (acc, g) in self.biases.iter_mut().zip(&other.biases) {
            *acc += g;
        }
        self.loss += other.loss;
    }
}

struct AdamState {
    m_weights: Vec<Array2<f64>>,
    v_weights: Vec<Array2<f64>>,
    m_biases: Vec<Array1<f64>>,
    v_biases: Vec<Array1<f64>>,
    t: i32,
}

impl AdamState {
    fn new(layers: &[DenseLayer]) -> Self {
        let zeros = Gradients::zeros(layers);
        Self {
            m_weights: zeros.weights.clone(),
            v_weights: zeros.weights,
            m_biases: zeros.biases.clone(),
            v_biases: zeros.biases,
            t: 0,
        }
    }

    fn step(&mut self, layers: &mut [DenseLayer], grads: &Gradients, learning_rate: f64) {
        self.t += 1;
        let lr_t = learning_rate * (1.0 - ADAM_BETA2.powi(self.t)).sqrt()
            / (1.0 - ADAM_BETA1.powi(self.t));

        for (i, layer) in layers.iter_mut().enumerate() {
            Zip::from(&mut layer.weights)
                .and(&mut self.m_weights[i])
                .and(&mut self.v_weights[i])
                .and(&grads.weights[i])
                .for_each(|w, m, v, &g| adam_update(w, m, v, g, lr_t));
            Zip::from(&mut layer.biases)
                .and(&mut self.m_biases[i])
                .and(&mut self.v_biases[i])
                .and(&grads.biases[i])
                .for_each(|b, m, v, &g| adam_update(b, m, v, g, lr_t));
        }
    }
}

fn adam_update(param: &mut f64, m: &mut f64, v: &mut f64, g: f64, lr_t: f64) {
    *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
    *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
    *param -= lr_t * *m / (v.sqrt() + ADAM_EPSILON);
}

/// Fitted multilayer perceptron.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpClassifier {
    layers: Vec<DenseLayer>,
    activation: Activation,
    epochs_run: usize,
}

impl MlpClassifier {
    /// Trains a network on `x` (one sample per row, already scaled) and labels `y`.
    ///
    /// `pool_size` bounds the worker threads used for gradient computation
    /// (`None` uses every available core).
    pub fn fit(
        x: &Array2<f64>,
        y: &[Direction],
        config: &MlpConfig,
        seed: u64,
        pool_size: Option<usize>,
    ) -> MlResult<Self> {
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(MlError::shape(format!(
                "{} feature rows for {} labels",
                n,
                y.len()
            )));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pool_size.unwrap_or(0))
            .build()
            .map_err(MlError::backend)?;

        let mut rng = StdRng::seed_from_u64(seed);
        let init_factor = if config.activation == Activation::Logistic {
            2.0
        } else {
            6.0
        };

        let mut sizes = vec![x.ncols()];
        sizes.extend(hidden_layer_sizes(config, x.ncols()));
        sizes.push(1);
        let layers = sizes
            .windows(2)
            .map(|pair| DenseLayer::glorot(pair[0], pair[1], init_factor, &mut rng))
            .collect::<Vec<_>>();

        let mut model = MlpClassifier {
            layers,
            activation: config.activation,
            epochs_run: 0,
        };
        debug!(
            "MLP layout {:?}, activation {:?}, {} worker threads",
            sizes,
            config.activation,
            pool.current_num_threads()
        );

        let targets: Array1<f64> = y.iter().map(|d| d.code() as f64).collect();
        let batch_size = config.batch_size.min(n);
        let mut indices: Vec<usize> = (0..n).collect();
        let mut adam = AdamState::new(&model.layers);
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0usize;

        for epoch in 0..config.max_epochs {
            indices.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in indices.chunks(batch_size) {
                let xb = x.select(Axis(0), batch);
                let yb = targets.select(Axis(0), batch);
                let mut grads = pool.install(|| model.batch_gradients(&xb, &yb));
                epoch_loss += grads.loss;

                let bs = batch.len() as f64;
                for (g, layer) in grads.weights.iter_mut().zip(&model.layers) {
                    g.mapv_inplace(|v| v / bs);
                    g.scaled_add(config.l2_penalty / bs, &layer.weights);
                }
                for g in grads.biases.iter_mut() {
                    g.mapv_inplace(|v| v / bs);
                }
                adam.step(&mut model.layers, &grads, config.learning_rate);
            }

            epoch_loss /= n as f64;
            if !epoch_loss.is_finite() {
                return Err(MlError::backend(format!(
                    "MLP training diverged at epoch {}",
                    epoch + 1
                )));
            }
            model.epochs_run = epoch + 1;

            if epoch_loss > best_loss - config.tolerance {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            best_loss = best_loss.min(epoch_loss);

            if no_improvement >= config.n_iter_no_change {
                debug!(
                    "MLP converged after {} epochs (loss {:.6})",
                    model.epochs_run, epoch_loss
                );
                break;
            }
        }

        Ok(model)
    }

    /// Layer shapes must chain from the input width to one output unit, with
    /// finite parameters throughout.
    pub(crate) fn validate(&self) -> Result<(), String> {
        let mut width = match self.layers.first() {
            Some(first) if first.weights.nrows() > 0 => first.weights.nrows(),
            _ => return Err("MLP has no input layer".to_string()),
        };

        for (i, layer) in self.layers.iter().enumerate() {
            let (inputs, units) = layer.weights.dim();
            if inputs != width {
                return Err(format!(
                    "layer {} takes {} inputs, previous layer yields {}",
                    i, inputs, width
                ));
            }
            if units == 0 || layer.biases.len() != units {
                return Err(format!(
                    "layer {} has {} units and {} biases",
                    i,
                    units,
                    layer.biases.len()
                ));
            }
            if layer
                .weights
                .iter()
                .chain(layer.biases.iter())
                .any(|v| !v.is_finite())
            {
                return Err(format!("layer {} has non-finite parameters", i));
            }
            width = units;
        }

        if width != 1 {
            return Err(format!("output layer has {} units, expected 1", width));
        }
        Ok(())
    }

    pub fn epochs_run(&self) -> usize {
        self.epochs_run
    }

    pub fn hidden_sizes(&self) -> Vec<usize> {
        self.layers[..self.layers.len() - 1]
            .iter()
            .map(|l| l.biases.len())
            .collect()
    }

    /// Probability of UP for every row of `x`.
    pub fn predict_proba(&self, x: &Array2<f64>) -> MlResult<Array1<f64>> {
        if x.ncols() != self.n_features() {
            return Err(MlError::shape(format!(
                "MLP expects {} features, got {}",
                self.n_features(),
                x.ncols()
            )));
        }
        let mut activations = self.forward_all(x.view());
        let output = activations
            .pop()
            .ok_or_else(|| MlError::backend("MLP has no layers"))?;
        Ok(output.column(0).to_owned())
    }

    fn forward_all(&self, x: ArrayView2<f64>) -> Vec<Array2<f64>> {
        let last = self.layers.len() - 1;
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(x.to_owned());

        for (i, layer) in self.layers.iter().enumerate() {
            let mut z = activations[i].dot(&layer.weights) + &layer.biases;
            if i == last {
                z.mapv_inplace(sigmoid);
            } else {
                self.activation.apply(&mut z);
            }
            activations.push(z);
        }
        activations
    }

    fn batch_gradients(&self, xb: &Array2<f64>, yb: &Array1<f64>) -> Gradients {
        let n = xb.nrows();
        let starts: Vec<usize> = (0..n).step_by(GRADIENT_CHUNK_ROWS).collect();

        let partials: Vec<Gradients> = starts
            .par_iter()
            .map(|&start| {
                let end = (start + GRADIENT_CHUNK_ROWS).min(n);
                self.chunk_gradients(xb.slice(s![start..end, ..]), yb.slice(s![start..end]))
            })
            .collect();

        partials
            .iter()
            .fold(Gradients::zeros(&self.layers), |mut acc, g| {
                acc.accumulate(g);
                acc
            })
    }

    /// Unnormalized loss and gradient sums over one chunk.
    fn chunk_gradients(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Gradients {
        let activations = self.forward_all(x);
        let output = &activations[self.layers.len()];

        let loss: f64 = output
            .iter()
            .zip(y.iter())
            .map(|(p, t)| {
                let p = p.clamp(PROB_CLIP, 1.0 - PROB_CLIP);
                -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
            })
            .sum();

        let y_col = y.insert_axis(Axis(1));
        let mut delta = output - &y_col;
        let mut weights = Vec::with_capacity(self.layers.len());
        let mut biases = Vec::with_capacity(self.layers.len());

        for l in (0..self.layers.len()).rev() {
            weights.push(activations[l].t().dot(&delta));
            biases.push(delta.sum_axis(Axis(0)));
            if l > 0 {
                delta = delta.dot(&self.layers[l].weights.t())
                    * &self.activation.derivative(&activations[l]);
            }
        }
        weights.reverse();
        biases.reverse();

        Gradients {
            weights,
            biases,
            loss,
        }
    }
}

impl Classifier for MlpClassifier {
    fn predict(&self, x: &Array2<f64>) -> MlResult<Vec<Direction>> {
        Ok(self
            .predict_proba(x)?
            .iter()
            .map(|p| if *p > 0.5 { Direction::Up } else { Direction::Down })
            .collect())
    }

    fn n_features(&self) -> usize {
        self.layers.first().map(|l| l.weights.nrows()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two gaussian-ish blobs separated along the first feature.
    fn separable(n: usize, seed: u64) -> (Array2<f64>, Vec<Direction>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = Array2::zeros((n, 3));
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let up = i % 2 == 0;
            let centre = if up { 1.5 } else { -1.5 };
            x[[i, 0]] = centre + rng.random_range(-0.5..0.5);
            x[[i, 1]] = rng.random_range(-1.0..1.0);
            x[[i, 2]] = rng.random_range(-1.0..1.0);
            y.push(if up { Direction::Up } else { Direction::Down });
        }
        (x, y)
    }

    fn config() -> MlpConfig {
        MlpConfig {
            hidden_layer_sizes: vec![4],
            learning_rate: 0.01,
            batch_size: 16,
            max_epochs: 100,
            ..MlpConfig::default()
        }
    }

    #[test]
    fn test_learns_separable_data() {
        let (x, y) = separable(120, 7);
        let model = MlpClassifier::fit(&x, &y, &config(), 42, Some(1)).unwrap();

        let score = model.score(&x, &y).unwrap();
        assert!(score > 0.95, "score was {}", score);
        assert!(model.epochs_run() >= 1);
    }

    #[test]
    fn test_pool_size_does_not_change_weights() {
        let (x, y) = separable(100, 3);
        let single = MlpClassifier::fit(&x, &y, &config(), 9, Some(1)).unwrap();
        let pooled = MlpClassifier::fit(&x, &y, &config(), 9, Some(4)).unwrap();
        assert_eq!(single, pooled);
    }

    #[test]
    fn test_same_seed_same_model() {
        let (x, y) = separable(60, 5);
        let a = MlpClassifier::fit(&x, &y, &config(), 1, None).unwrap();
        let b = MlpClassifier::fit(&x, &y, &config(), 1, None).unwrap();
        let c = MlpClassifier::fit(&x, &y, &config(), 2, None).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_default_hidden_layer_uses_pyramid_rule() {
        let config = MlpConfig::default();
        assert_eq!(hidden_layer_sizes(&config, 5160), vec![101]);
        assert_eq!(hidden_layer_sizes(&config, 1), vec![1]);
    }

    #[test]
    fn test_probabilities_are_bounded() {
        let (x, y) = separable(40, 11);
        let model = MlpClassifier::fit(&x, &y, &config(), 42, Some(2)).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
        assert_eq!(model.hidden_sizes(), vec![4]);
    }

    #[test]
    fn test_rejects_wrong_width() {
        let (x, y) = separable(20, 1);
        let model = MlpClassifier::fit(&x, &y, &config(), 42, Some(1)).unwrap();
        let narrow = Array2::zeros((1, 2));
        assert!(matches!(
            model.predict(&narrow),
            Err(MlError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_catches_broken_layer_shapes() {
        let (x, y) = separable(20, 1);
        let model = MlpClassifier::fit(&x, &y, &config(), 42, Some(1)).unwrap();
        assert!(model.validate().is_ok());

        let mut wrong_inputs = model.clone();
        wrong_inputs.layers[1].weights = Array2::zeros((3, 1));
        assert!(wrong_inputs.validate().is_err());

        let mut wrong_biases = model.clone();
        wrong_biases.layers[0].biases = Array1::zeros(2);
        assert!(wrong_biases.validate().is_err());

        let mut two_outputs = model.clone();
        two_outputs.layers[1].weights = Array2::zeros((4, 2));
        two_outputs.layers[1].biases = Array1::zeros(2);
        assert!(two_outputs.validate().is_err());

        let mut non_finite = model.clone();
        non_finite.layers[0].weights[[0, 0]] = f64::NAN;
        assert!(non_finite.validate().is_err());

        let mut empty = model;
        empty.layers.clear();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_activation_parsing() {
        assert_eq!("tanh".parse::<Activation>().unwrap(), Activation::Tanh);
        assert_eq!("ReLU".parse::<Activation>().unwrap(), Activation::Relu);
        assert!("softmax".parse::<Activation>().is_err());
    }
}
