use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3};
use serde::{Serialize, Deserialize};
use std::fs;
use std::path::Path;

use super::{check_backward_shapes, CommunicationGraph, GraphSample};
use crate::error::{MarlError, Result};

/// A constant communication matrix. Never trained.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FixedGraph {
    matrix: Array2<f32>,
    input_dim: usize,
}

impl FixedGraph {
    pub fn new(matrix: Array2<f32>, input_dim: usize) -> Result<Self> {
        if matrix.nrows() != matrix.ncols() || matrix.nrows() == 0 {
            return Err(MarlError::dimension_mismatch(
                "non-empty square matrix".to_string(),
                format!("{:?}", matrix.dim()),
            ));
        }
        Ok(FixedGraph { matrix, input_dim })
    }

    /// Every agent only sees itself.
    pub fn identity(agent_count: usize, input_dim: usize) -> Result<Self> {
        Self::new(Array2::eye(agent_count), input_dim)
    }

    /// Every agent receives the mean of all hidden states.
    pub fn uniform(agent_count: usize, input_dim: usize) -> Result<Self> {
        let weight = 1.0 / agent_count.max(1) as f32;
        Self::new(Array2::from_elem((agent_count, agent_count), weight), input_dim)
    }

    pub fn matrix(&self) -> &Array2<f32> {
        &self.matrix
    }
}

impl CommunicationGraph for FixedGraph {
    fn agent_count(&self) -> usize {
        self.matrix.nrows()
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn forward(&mut self, full_observation: ArrayView1<f32>) -> Result<GraphSample> {
        MarlError::check_len("graph observation", self.input_dim, full_observation.len())?;
        Ok(GraphSample {
            matrix: self.matrix.clone(),
            log_probs: Array2::zeros(self.matrix.dim()),
        })
    }

    fn backward(
        &mut self,
        observations: ArrayView2<f32>,
        _q_values: ArrayView1<f32>,
        matrices: ArrayView3<f32>,
        log_probs: ArrayView3<f32>,
    ) -> Result<f32> {
        check_backward_shapes(&*self, observations, matrices, log_probs)?;
        Ok(0.0)
    }

    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, bincode::serialize(self)?)?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let loaded: FixedGraph = bincode::deserialize(&fs::read(path)?)?;
        *self = loaded;
        Ok(())
    }
}
