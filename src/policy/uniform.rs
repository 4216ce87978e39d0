use ndarray::{Array1, ArrayView1};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{AgentInfo, Policy, PolicyKind};
use crate::error::{MarlError, Result};

/// Uniform random actions in `[-1, 1]`, ignoring the observation.
#[derive(Clone, Debug)]
pub struct UniformPolicy {
    observation_dim: usize,
    action_dim: usize,
    kind: PolicyKind,
    rng: StdRng,
}

impl UniformPolicy {
    pub fn new(observation_dim: usize, action_dim: usize, seed: u64) -> Self {
        UniformPolicy {
            observation_dim,
            action_dim,
            kind: PolicyKind::Independent,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_kind(mut self, kind: PolicyKind) -> Self {
        self.kind = kind;
        self
    }
}

impl Policy for UniformPolicy {
    fn kind(&self) -> PolicyKind {
        self.kind
    }

    fn observation_dim(&self) -> usize {
        self.observation_dim
    }

    fn action_dim(&self) -> usize {
        self.action_dim
    }

    fn get_action(&mut self, observation: ArrayView1<f32>) -> Result<(Array1<f32>, AgentInfo)> {
        MarlError::check_len("observation", self.observation_dim, observation.len())?;
        let action = Array1::random_using(self.action_dim, Uniform::new_inclusive(-1.0, 1.0), &mut self.rng);
        Ok((action, AgentInfo::new()))
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }
}
