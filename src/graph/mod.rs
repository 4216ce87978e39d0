//! # Communication Graphs
//!
//! A communication graph maps the concatenated observation of every agent to a
//! square mixing matrix `A` (row `i` holds the weights agent `i` puts on every
//! agent's hidden state, itself included) plus the log-probability of having
//! produced it. Samplers turn `A` into messages with [`compute_messages`].

pub mod fixed;
pub mod stochastic;

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3};
use std::path::Path;

use crate::error::{MarlError, Result};

pub use fixed::FixedGraph;
pub use stochastic::{GraphMode, StochasticGraph};

/// Output of one graph forward pass.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphSample {
    /// `agent_count x agent_count` mixing weights
    pub matrix: Array2<f32>,
    /// Same shape as `matrix`
    pub log_probs: Array2<f32>,
}

pub trait CommunicationGraph {
    fn agent_count(&self) -> usize;

    /// Width of the full observation this graph expects.
    fn input_dim(&self) -> usize;

    fn forward(&mut self, full_observation: ArrayView1<f32>) -> Result<GraphSample>;

    /// One training step on stored samples.
    ///
    /// `observations` is `batch x input_dim`, `matrices` and `log_probs` are
    /// `batch x n x n`, `q_values` holds either one value per row or a single
    /// value shared by every row. Returns the loss.
    fn backward(
        &mut self,
        observations: ArrayView2<f32>,
        q_values: ArrayView1<f32>,
        matrices: ArrayView3<f32>,
        log_probs: ArrayView3<f32>,
    ) -> Result<f32>;

    fn save(&self, path: &Path) -> Result<()>;
    fn load(&mut self, path: &Path) -> Result<()>;
}

impl<G: CommunicationGraph + ?Sized> CommunicationGraph for Box<G> {
    fn agent_count(&self) -> usize {
        (**self).agent_count()
    }

    fn input_dim(&self) -> usize {
        (**self).input_dim()
    }

    fn forward(&mut self, full_observation: ArrayView1<f32>) -> Result<GraphSample> {
        (**self).forward(full_observation)
    }

    fn backward(
        &mut self,
        observations: ArrayView2<f32>,
        q_values: ArrayView1<f32>,
        matrices: ArrayView3<f32>,
        log_probs: ArrayView3<f32>,
    ) -> Result<f32> {
        (**self).backward(observations, q_values, matrices, log_probs)
    }

    fn save(&self, path: &Path) -> Result<()> {
        (**self).save(path)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        (**self).load(path)
    }
}

/// `messages = A x hidden`, where `hidden` stacks one observation row per agent.
pub fn compute_messages(matrix: ArrayView2<f32>, hidden: ArrayView2<f32>) -> Result<Array2<f32>> {
    let n = hidden.nrows();
    if matrix.dim() != (n, n) {
        return Err(MarlError::dimension_mismatch(
            format!("{}x{} communication matrix", n, n),
            format!("{:?}", matrix.dim()),
        ));
    }
    Ok(matrix.dot(&hidden))
}

/// Broadcast `q_values` to one entry per batch row.
pub(crate) fn expand_q_values(q_values: ArrayView1<f32>, batch: usize) -> Result<ndarray::Array1<f32>> {
    match q_values.len() {
        1 => Ok(ndarray::Array1::from_elem(batch, q_values[0])),
        n if n == batch => Ok(q_values.to_owned()),
        n => Err(MarlError::dimension_mismatch(
            format!("1 or {} q values", batch),
            format!("{}", n),
        )),
    }
}

pub(crate) fn check_backward_shapes(
    graph: &dyn CommunicationGraph,
    observations: ArrayView2<f32>,
    matrices: ArrayView3<f32>,
    log_probs: ArrayView3<f32>,
) -> Result<()> {
    let batch = observations.nrows();
    let n = graph.agent_count();
    MarlError::check_len("graph observation", graph.input_dim(), observations.ncols())?;
    for (what, stack) in [("matrices", matrices.view()), ("log probabilities", log_probs.view())] {
        if stack.dim() != (batch, n, n) {
            return Err(MarlError::dimension_mismatch(
                format!("{} shaped {:?}", what, (batch, n, n)),
                format!("{:?}", stack.dim()),
            ));
        }
    }
    if batch == 0 {
        return Err(MarlError::EmptyBuffer("graph update needs at least one row".to_string()));
    }
    Ok(())
}
