use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Serialize, Deserialize};
use std::path::Path;
use tracing::debug;

use super::{check_backward_shapes, expand_q_values, CommunicationGraph, GraphSample};
use crate::activations::{sigmoid, Activation};
use crate::error::{MarlError, Result};
use crate::network::NeuralNetwork;
use crate::optimizer::{GradientClipper, OptimizerWrapper};

const PROB_EPS: f32 = 1e-6;

/// How edges are chosen from their probabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GraphMode {
    /// Bernoulli draw per edge
    #[default]
    Sample,
    /// Keep edges with probability above one half
    Greedy,
}

/// Learned stochastic communication graph.
///
/// An MLP maps the full observation to `n x n` edge logits. Off-diagonal edges
/// are kept with probability `sigmoid(logit)`, self loops always. The mixing
/// matrix is the kept-edge mask normalised per row, and the log-probability
/// entry `(i, j)` is the Bernoulli log-likelihood of the choice for that edge
/// (zero on the diagonal). Trained with REINFORCE against critic Q values.
#[derive(Clone, Debug)]
pub struct StochasticGraph {
    network: NeuralNetwork,
    agent_count: usize,
    mode: GraphMode,
    optimizer: OptimizerWrapper,
    clipper: GradientClipper,
    learning_rate: f32,
    rng: StdRng,
}

impl StochasticGraph {
    pub fn new(input_dim: usize, agent_count: usize, hidden_sizes: &[usize], seed: u64) -> Result<Self> {
        if agent_count == 0 {
            return Err(MarlError::invalid_parameter("agent_count", "must be positive"));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let network = NeuralNetwork::mlp(
            input_dim,
            hidden_sizes,
            agent_count * agent_count,
            Activation::Linear,
            &mut rng,
        )?;
        Ok(StochasticGraph {
            network,
            agent_count,
            mode: GraphMode::Sample,
            optimizer: OptimizerWrapper::adam(),
            clipper: GradientClipper::ByGlobalNorm { max_norm: 10.0 },
            learning_rate: 1e-3,
            rng,
        })
    }

    pub fn with_mode(mut self, mode: GraphMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerWrapper) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_clipper(mut self, clipper: GradientClipper) -> Self {
        self.clipper = clipper;
        self
    }

    pub fn mode(&self) -> GraphMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: GraphMode) {
        self.mode = mode;
    }

    /// Edge probabilities for a batch of full observations, `batch x n x n` flattened per row.
    fn probabilities(&self, observations: ArrayView2<f32>) -> Result<Array2<f32>> {
        let logits = self.network.predict_batch(observations)?;
        Ok(logits.mapv(|l| sigmoid(l).clamp(PROB_EPS, 1.0 - PROB_EPS)))
    }

    pub fn edge_probabilities(&self, full_observation: ArrayView1<f32>) -> Result<Array2<f32>> {
        let n = self.agent_count;
        let probs = self.probabilities(full_observation.insert_axis(Axis(0)))?;
        Ok(probs.into_shape((n, n))?)
    }

    fn normalise(mask: &Array2<f32>) -> Array2<f32> {
        let mut matrix = mask.clone();
        for mut row in matrix.rows_mut() {
            let total = row.sum();
            if total > 0.0 {
                row.mapv_inplace(|v| v / total);
            }
        }
        matrix
    }
}

impl CommunicationGraph for StochasticGraph {
    fn agent_count(&self) -> usize {
        self.agent_count
    }

    fn input_dim(&self) -> usize {
        self.network.input_size()
    }

    fn forward(&mut self, full_observation: ArrayView1<f32>) -> Result<GraphSample> {
        let n = self.agent_count;
        let probs = self.edge_probabilities(full_observation)?;

        let mut mask = Array2::zeros((n, n));
        let mut log_probs = Array2::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    mask[[i, j]] = 1.0;
                    continue;
                }
                let p = probs[[i, j]];
                let keep = match self.mode {
                    GraphMode::Sample => self.rng.gen::<f32>() < p,
                    GraphMode::Greedy => p > 0.5,
                };
                if keep {
                    mask[[i, j]] = 1.0;
                    log_probs[[i, j]] = p.ln();
                } else {
                    log_probs[[i, j]] = (1.0 - p).ln();
                }
            }
        }

        Ok(GraphSample {
            matrix: Self::normalise(&mask),
            log_probs,
        })
    }

    fn backward(
        &mut self,
        observations: ArrayView2<f32>,
        q_values: ArrayView1<f32>,
        matrices: ArrayView3<f32>,
        log_probs: ArrayView3<f32>,
    ) -> Result<f32> {
        check_backward_shapes(&*self, observations, matrices, log_probs)?;
        let batch = observations.nrows();
        let n = self.agent_count;
        let q = expand_q_values(q_values, batch)?;

        let log_totals: Array1<f32> = log_probs
            .outer_iter()
            .map(|sample| sample.sum())
            .collect();
        let loss = -(&q * &log_totals).mean().unwrap_or(0.0);
        if !loss.is_finite() {
            return Err(MarlError::NumericalError(format!("graph loss is {}", loss)));
        }

        // d(-q * log p(e)) / d logit = -q * (e - p), averaged over the batch
        let logits = self.network.forward_batch(observations)?;
        let mut errors = Array2::zeros((batch, n * n));
        for b in 0..batch {
            for i in 0..n {
                for j in 0..n {
                    if i == j {
                        continue;
                    }
                    let p = sigmoid(logits[[b, i * n + j]]);
                    let edge = if matrices[[b, i, j]] > 0.0 { 1.0 } else { 0.0 };
                    errors[[b, i * n + j]] = -q[b] * (edge - p) / batch as f32;
                }
            }
        }

        let (mut gradients, _) = self.network.backward_batch(errors.view())?;
        self.clipper.clip(&mut gradients);
        self.network.apply_gradients(&gradients, &mut self.optimizer, self.learning_rate)?;
        debug!(loss, batch, "graph model updated");
        Ok(loss)
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.network.save(path)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let network = NeuralNetwork::load(path)?;
        MarlError::check_len("graph input", self.input_dim(), network.input_size())?;
        MarlError::check_len("graph output", self.agent_count * self.agent_count, network.output_size())?;
        self.network = network;
        Ok(())
    }
}
