use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;

use super::{AgentInfo, GaussianNoise, NoiseControl, Policy, PolicyKind};
use crate::activations::Activation;
use crate::error::{MarlError, Result};
use crate::network::NeuralNetwork;

/// Deterministic tanh actor with Gaussian exploration noise.
#[derive(Clone, Debug)]
pub struct DeterministicPolicy {
    pub actor: NeuralNetwork,
    kind: PolicyKind,
    noise: GaussianNoise,
}

impl DeterministicPolicy {
    pub fn new<R: Rng + ?Sized>(
        observation_dim: usize,
        action_dim: usize,
        hidden_sizes: &[usize],
        kind: PolicyKind,
        noise_level: f32,
        noise_seed: u64,
        rng: &mut R,
    ) -> Result<Self> {
        let actor = NeuralNetwork::mlp(observation_dim, hidden_sizes, action_dim, Activation::Tanh, rng)?;
        Self::from_network(actor, kind, noise_level, noise_seed)
    }

    pub fn from_network(actor: NeuralNetwork, kind: PolicyKind, noise_level: f32, noise_seed: u64) -> Result<Self> {
        if kind.is_opponent_modelling() {
            return Err(MarlError::invalid_parameter(
                "kind",
                "opponent modelling needs a ConditionalPolicy",
            ));
        }
        Ok(DeterministicPolicy {
            actor,
            kind,
            noise: GaussianNoise::new(noise_level, noise_seed),
        })
    }

    /// Noise-free actions for a batch of observations.
    pub fn act(&self, observations: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.actor.predict_batch(observations)
    }
}

impl Policy for DeterministicPolicy {
    fn kind(&self) -> PolicyKind {
        self.kind
    }

    fn observation_dim(&self) -> usize {
        self.actor.input_size()
    }

    fn action_dim(&self) -> usize {
        self.actor.output_size()
    }

    fn get_action(&mut self, observation: ArrayView1<f32>) -> Result<(Array1<f32>, AgentInfo)> {
        let mut action = self.actor.forward(observation)?;
        self.noise.perturb(&mut action);
        Ok((action, AgentInfo::new()))
    }

    fn get_actions(&mut self, observations: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut actions = self.act(observations)?;
        for mut row in actions.rows_mut() {
            let mut action = row.to_owned();
            self.noise.perturb(&mut action);
            row.assign(&action);
        }
        Ok(actions)
    }

    fn reseed(&mut self, seed: u64) {
        self.noise.reseed(seed);
    }

    fn noise_control(&mut self) -> Option<&mut dyn NoiseControl> {
        Some(self)
    }
}

impl NoiseControl for DeterministicPolicy {
    fn noise_level(&self) -> f32 {
        self.noise.level()
    }

    fn set_noise_level(&mut self, level: f32) {
        self.noise.set_level(level);
    }
}
