use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Serialize, Deserialize};
use std::fs;
use std::path::Path;

use crate::activations::Activation;
use crate::error::{MarlError, Result};
use crate::optimizer::{Optimizer, OptimizerWrapper};

/// Gradients of one dense layer's parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerGradients {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
}

/// A fully connected layer: `activation(inputs · W + b)`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DenseLayer {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
    pub activation: Activation,
    #[serde(skip)]
    pre_activation_output: Option<Array2<f32>>,
    #[serde(skip)]
    inputs: Option<Array2<f32>>,
}

impl DenseLayer {
    /// Create a layer with weights drawn uniformly from `±1/sqrt(input_size)` and zero biases.
    pub fn new<R: Rng + ?Sized>(input_size: usize, output_size: usize, activation: Activation, rng: &mut R) -> Self {
        let bound = 1.0 / (input_size.max(1) as f32).sqrt();
        let weights = Array2::random_using((input_size, output_size), Uniform::new(-bound, bound), rng);
        DenseLayer {
            weights,
            biases: Array1::zeros(output_size),
            activation,
            pre_activation_output: None,
            inputs: None,
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn output_size(&self) -> usize {
        self.weights.ncols()
    }

    fn predict_batch(&self, inputs: ArrayView2<f32>) -> Array2<f32> {
        let mut outputs = inputs.dot(&self.weights) + &self.biases.view().insert_axis(Axis(0));
        self.activation.apply_batch(&mut outputs);
        outputs
    }

    fn forward_batch(&mut self, inputs: ArrayView2<f32>) -> Array2<f32> {
        self.inputs = Some(inputs.to_owned());
        let mut outputs = inputs.dot(&self.weights) + &self.biases.view().insert_axis(Axis(0));
        self.pre_activation_output = Some(outputs.clone());
        self.activation.apply_batch(&mut outputs);
        outputs
    }

    /// Returns the parameter gradients and the error propagated to this layer's input.
    fn backward_batch(&self, output_errors: ArrayView2<f32>) -> Result<(LayerGradients, Array2<f32>)> {
        let (pre_activation, inputs) = match (&self.pre_activation_output, &self.inputs) {
            (Some(pre), Some(inputs)) => (pre, inputs),
            _ => {
                return Err(MarlError::TrainingError(
                    "forward_batch() must be called before backward_batch()".to_string(),
                ))
            }
        };
        if output_errors.dim() != pre_activation.dim() {
            return Err(MarlError::dimension_mismatch(
                format!("{:?}", pre_activation.dim()),
                format!("{:?}", output_errors.dim()),
            ));
        }

        let adjusted = &output_errors * &self.activation.derivative_batch(pre_activation.view());
        let gradients = LayerGradients {
            weights: inputs.t().dot(&adjusted),
            biases: adjusted.sum_axis(Axis(0)),
        };
        let input_errors = adjusted.dot(&self.weights.t());
        Ok((gradients, input_errors))
    }
}

/// A stack of dense layers.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NeuralNetwork {
    pub layers: Vec<DenseLayer>,
}

impl NeuralNetwork {
    /// Build a network from `layer_sizes` (input first) and one activation per layer.
    pub fn new<R: Rng + ?Sized>(layer_sizes: &[usize], activations: &[Activation], rng: &mut R) -> Result<Self> {
        if layer_sizes.len() < 2 {
            return Err(MarlError::invalid_parameter(
                "layer_sizes",
                "need at least an input and an output size",
            ));
        }
        if layer_sizes.len() - 1 != activations.len() {
            return Err(MarlError::dimension_mismatch(
                format!("{} activations", layer_sizes.len() - 1),
                format!("{} activations", activations.len()),
            ));
        }

        let layers = layer_sizes
            .windows(2)
            .zip(activations.iter())
            .map(|(window, &activation)| DenseLayer::new(window[0], window[1], activation, rng))
            .collect();

        Ok(NeuralNetwork { layers })
    }

    /// Hidden layers use ReLU, the output layer uses `output`.
    pub fn mlp<R: Rng + ?Sized>(
        input_size: usize,
        hidden_sizes: &[usize],
        output_size: usize,
        output: Activation,
        rng: &mut R,
    ) -> Result<Self> {
        let mut sizes = Vec::with_capacity(hidden_sizes.len() + 2);
        sizes.push(input_size);
        sizes.extend_from_slice(hidden_sizes);
        sizes.push(output_size);

        let activations: Vec<Activation> = std::iter::repeat(Activation::Relu)
            .take(hidden_sizes.len())
            .chain(std::iter::once(output))
            .collect();

        Self::new(&sizes, &activations, rng)
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::input_size)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::output_size)
    }

    /// Inference on a single input. Does not touch the backprop caches.
    pub fn forward(&self, input: ArrayView1<f32>) -> Result<Array1<f32>> {
        let output = self.predict_batch(input.insert_axis(Axis(0)))?;
        Ok(output.row(0).to_owned())
    }

    /// Inference on a batch. Does not touch the backprop caches.
    pub fn predict_batch(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        MarlError::check_len("network input", self.input_size(), inputs.ncols())?;
        let mut current = inputs.to_owned();
        for layer in &self.layers {
            current = layer.predict_batch(current.view());
        }
        Ok(current)
    }

    /// Forward pass that caches intermediate values for `backward_batch`.
    pub fn forward_batch(&mut self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        MarlError::check_len("network input", self.input_size(), inputs.ncols())?;
        let mut current = inputs.to_owned();
        for layer in &mut self.layers {
            current = layer.forward_batch(current.view());
        }
        Ok(current)
    }

    /// Backpropagate `output_errors` (dLoss/dOutput) through the cached forward pass.
    ///
    /// Returns one `LayerGradients` per layer (input layer first) and dLoss/dInput.
    pub fn backward_batch(&self, output_errors: ArrayView2<f32>) -> Result<(Vec<LayerGradients>, Array2<f32>)> {
        let mut gradients = Vec::with_capacity(self.layers.len());
        let mut current = output_errors.to_owned();

        for layer in self.layers.iter().rev() {
            let (grads, input_errors) = layer.backward_batch(current.view())?;
            gradients.push(grads);
            current = input_errors;
        }

        gradients.reverse();
        Ok((gradients, current))
    }

    pub fn apply_gradients(
        &mut self,
        gradients: &[LayerGradients],
        optimizer: &mut OptimizerWrapper,
        learning_rate: f32,
    ) -> Result<()> {
        MarlError::check_len("layer gradients", self.layers.len(), gradients.len())?;
        for (index, (layer, grads)) in self.layers.iter_mut().zip(gradients).enumerate() {
            if layer.weights.dim() != grads.weights.dim() || layer.biases.len() != grads.biases.len() {
                return Err(MarlError::dimension_mismatch(
                    format!("gradients shaped like layer {} {:?}", index, layer.weights.dim()),
                    format!("{:?}", grads.weights.dim()),
                ));
            }
            optimizer.update_weights(index, &mut layer.weights, &grads.weights, learning_rate);
            optimizer.update_biases(index, &mut layer.biases, &grads.biases, learning_rate);
        }
        optimizer.end_step();
        Ok(())
    }

    /// Polyak averaging: `self = (1 - tau) * self + tau * source`.
    pub fn soft_update_from(&mut self, source: &NeuralNetwork, tau: f32) {
        for (target, source) in self.layers.iter_mut().zip(source.layers.iter()) {
            target.weights.zip_mut_with(&source.weights, |t, &s| *t = (1.0 - tau) * *t + tau * s);
            target.biases.zip_mut_with(&source.biases, |t, &s| *t = (1.0 - tau) * *t + tau * s);
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = bincode::serialize(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(bincode::deserialize(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::Sgd;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_shapes() {
        let net = NeuralNetwork::mlp(4, &[8, 8], 3, Activation::Tanh, &mut rng()).unwrap();
        assert_eq!(net.layers.len(), 3);
        assert_eq!(net.input_size(), 4);
        assert_eq!(net.output_size(), 3);

        let out = net.forward(array![0.1, 0.2, 0.3, 0.4].view()).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_wrong_input_width_is_an_error() {
        let net = NeuralNetwork::mlp(4, &[8], 2, Activation::Linear, &mut rng()).unwrap();
        assert!(net.forward(array![1.0, 2.0].view()).is_err());
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = NeuralNetwork::mlp(3, &[5], 2, Activation::Linear, &mut rng()).unwrap();
        let b = NeuralNetwork::mlp(3, &[5], 2, Activation::Linear, &mut rng()).unwrap();
        assert_eq!(a.layers[0].weights, b.layers[0].weights);
        assert_eq!(a.layers[1].weights, b.layers[1].weights);
    }

    #[test]
    fn test_input_gradient_matches_finite_difference() {
        let mut net = NeuralNetwork::mlp(3, &[6], 1, Activation::Linear, &mut rng()).unwrap();
        let x = array![[0.3, -0.2, 0.5]];
        net.forward_batch(x.view()).unwrap();
        let (_, dx) = net.backward_batch(array![[1.0]].view()).unwrap();

        let eps = 1e-3;
        for j in 0..3 {
            let mut plus = x.clone();
            plus[[0, j]] += eps;
            let mut minus = x.clone();
            minus[[0, j]] -= eps;
            let numeric = (net.predict_batch(plus.view()).unwrap()[[0, 0]]
                - net.predict_batch(minus.view()).unwrap()[[0, 0]])
                / (2.0 * eps);
            assert!((numeric - dx[[0, j]]).abs() < 1e-2, "column {}: {} vs {}", j, numeric, dx[[0, j]]);
        }
    }

    #[test]
    fn test_regression_loss_decreases() {
        let mut net = NeuralNetwork::mlp(2, &[16], 1, Activation::Linear, &mut rng()).unwrap();
        let mut optimizer = OptimizerWrapper::Sgd(Sgd::new());
        let inputs = array![[0.0, 1.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]];
        let targets = array![[1.0], [-1.0], [0.0], [0.5]];

        let loss = |net: &NeuralNetwork| {
            let out = net.predict_batch(inputs.view()).unwrap();
            (&out - &targets).mapv(|e| e * e).mean().unwrap()
        };

        let before = loss(&net);
        for _ in 0..200 {
            let out = net.forward_batch(inputs.view()).unwrap();
            let errors = (&out - &targets) * (2.0 / inputs.nrows() as f32);
            let (grads, _) = net.backward_batch(errors.view()).unwrap();
            net.apply_gradients(&grads, &mut optimizer, 0.05).unwrap();
        }
        assert!(loss(&net) < before * 0.5);
    }

    #[test]
    fn test_backward_without_forward_fails() {
        let net = NeuralNetwork::mlp(2, &[4], 1, Activation::Linear, &mut rng()).unwrap();
        assert!(net.backward_batch(array![[1.0]].view()).is_err());
    }

    #[test]
    fn test_soft_update() {
        let mut target = NeuralNetwork::mlp(2, &[], 1, Activation::Linear, &mut rng()).unwrap();
        let mut source = target.clone();
        target.layers[0].weights.fill(0.0);
        source.layers[0].weights.fill(1.0);
        target.soft_update_from(&source, 0.25);
        assert!(target.layers[0].weights.iter().all(|&w| (w - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let net = NeuralNetwork::mlp(3, &[4], 2, Activation::Tanh, &mut rng()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.bin");
        net.save(&path).unwrap();
        let loaded = NeuralNetwork::load(&path).unwrap();
        assert_eq!(net.layers[0].weights, loaded.layers[0].weights);
        assert_eq!(net.layers[1].biases, loaded.layers[1].biases);
    }
}
