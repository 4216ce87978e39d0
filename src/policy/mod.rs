//! # Policies
//!
//! Per-agent policies queried by the samplers. The concrete policies form a closed
//! set wrapped by [`PolicyVariant`], which is what samplers and learners pass around.
//!
//! Joint policies (centralized critics, opponent modelling) may emit more than
//! `action_dim` values; [`split_own_action`] is the only place where such an
//! output is cut back to the agent's own action.

pub mod conditional;
pub mod deterministic;
pub mod uniform;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Serialize, Deserialize};
use std::collections::HashMap;

use crate::error::{MarlError, Result};

pub use conditional::ConditionalPolicy;
pub use deterministic::DeterministicPolicy;
pub use uniform::UniformPolicy;

/// Auxiliary per-step output of a policy.
pub type AgentInfo = HashMap<String, f32>;

/// How an agent's experience is stored and trained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PolicyKind {
    /// Own observation and action only
    #[default]
    Independent,
    /// Centralized critic over every agent's action
    Joint,
    /// Centralized critic plus a learned model of the other agents' actions
    OpponentModelling,
}

impl PolicyKind {
    /// Joint kinds store opponent actions and may emit trailing output components.
    pub fn is_joint(self) -> bool {
        !matches!(self, PolicyKind::Independent)
    }

    pub fn is_opponent_modelling(self) -> bool {
        matches!(self, PolicyKind::OpponentModelling)
    }
}

/// Policies whose exploration noise can be adjusted during training.
pub trait NoiseControl {
    fn noise_level(&self) -> f32;
    fn set_noise_level(&mut self, level: f32);
}

pub trait Policy {
    fn kind(&self) -> PolicyKind;
    fn observation_dim(&self) -> usize;
    fn action_dim(&self) -> usize;

    /// Length of the raw output of `get_action`. Only joint kinds may exceed `action_dim`.
    fn output_dim(&self) -> usize {
        self.action_dim()
    }

    fn get_action(&mut self, observation: ArrayView1<f32>) -> Result<(Array1<f32>, AgentInfo)>;

    /// One output row per observation row.
    fn get_actions(&mut self, observations: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut actions = Array2::zeros((observations.nrows(), self.output_dim()));
        for (i, observation) in observations.rows().into_iter().enumerate() {
            let (action, _) = self.get_action(observation)?;
            MarlError::check_len("policy output", self.output_dim(), action.len())?;
            actions.row_mut(i).assign(&action);
        }
        Ok(actions)
    }

    /// Every level of the reasoning ladder, lowest first. Single-level by default.
    fn get_all_actions(&mut self, observation: ArrayView1<f32>) -> Result<Vec<Array1<f32>>> {
        let (action, _) = self.get_action(observation)?;
        Ok(vec![action])
    }

    fn reset(&mut self) {}

    /// Restart the exploration noise stream.
    fn reseed(&mut self, _seed: u64) {}

    fn noise_control(&mut self) -> Option<&mut dyn NoiseControl> {
        None
    }
}

/// Cut a raw policy output down to the agent's own action.
///
/// Outputs of exactly `action_dim` pass through. Longer outputs are accepted only
/// from joint policies, which keep the first `action_dim` components.
pub fn split_own_action(raw: &Array1<f32>, action_dim: usize, joint: bool) -> Result<Array1<f32>> {
    if raw.len() == action_dim {
        return Ok(raw.clone());
    }
    if joint && raw.len() > action_dim {
        return Ok(raw.slice(s![..action_dim]).to_owned());
    }
    Err(MarlError::dimension_mismatch(
        format!("action of length {}", action_dim),
        format!("policy output of length {}", raw.len()),
    ))
}

/// Seeded Gaussian exploration noise with an adjustable scale.
#[derive(Clone, Debug)]
pub struct GaussianNoise {
    level: f32,
    rng: StdRng,
}

impl GaussianNoise {
    pub fn new(level: f32, seed: u64) -> Self {
        GaussianNoise {
            level,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn set_level(&mut self, level: f32) {
        self.level = level.max(0.0);
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Add noise to `action` and clip it back into `[-1, 1]`.
    pub fn perturb(&mut self, action: &mut Array1<f32>) {
        if self.level > 0.0 {
            let level = self.level;
            let rng = &mut self.rng;
            action.mapv_inplace(|a| {
                let n: f32 = StandardNormal.sample(rng);
                a + level * n
            });
        }
        action.mapv_inplace(|a| a.clamp(-1.0, 1.0));
    }
}

#[derive(Clone, Debug)]
pub enum PolicyVariant {
    Deterministic(DeterministicPolicy),
    Conditional(ConditionalPolicy),
    Uniform(UniformPolicy),
}

impl From<DeterministicPolicy> for PolicyVariant {
    fn from(policy: DeterministicPolicy) -> Self {
        PolicyVariant::Deterministic(policy)
    }
}

impl From<ConditionalPolicy> for PolicyVariant {
    fn from(policy: ConditionalPolicy) -> Self {
        PolicyVariant::Conditional(policy)
    }
}

impl From<UniformPolicy> for PolicyVariant {
    fn from(policy: UniformPolicy) -> Self {
        PolicyVariant::Uniform(policy)
    }
}

macro_rules! dispatch {
    ($self:ident, $policy:ident => $call:expr) => {
        match $self {
            PolicyVariant::Deterministic($policy) => $call,
            PolicyVariant::Conditional($policy) => $call,
            PolicyVariant::Uniform($policy) => $call,
        }
    };
}

impl Policy for PolicyVariant {
    fn kind(&self) -> PolicyKind {
        dispatch!(self, p => p.kind())
    }

    fn observation_dim(&self) -> usize {
        dispatch!(self, p => p.observation_dim())
    }

    fn action_dim(&self) -> usize {
        dispatch!(self, p => p.action_dim())
    }

    fn output_dim(&self) -> usize {
        dispatch!(self, p => p.output_dim())
    }

    fn get_action(&mut self, observation: ArrayView1<f32>) -> Result<(Array1<f32>, AgentInfo)> {
        dispatch!(self, p => p.get_action(observation))
    }

    fn get_actions(&mut self, observations: ArrayView2<f32>) -> Result<Array2<f32>> {
        dispatch!(self, p => p.get_actions(observations))
    }

    fn get_all_actions(&mut self, observation: ArrayView1<f32>) -> Result<Vec<Array1<f32>>> {
        dispatch!(self, p => p.get_all_actions(observation))
    }

    fn reset(&mut self) {
        dispatch!(self, p => p.reset())
    }

    fn reseed(&mut self, seed: u64) {
        dispatch!(self, p => p.reseed(seed))
    }

    fn noise_control(&mut self) -> Option<&mut dyn NoiseControl> {
        dispatch!(self, p => p.noise_control())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_split_passes_exact_outputs() {
        let raw = array![0.1, 0.2];
        assert_eq!(split_own_action(&raw, 2, false).unwrap(), raw);
        assert_eq!(split_own_action(&raw, 2, true).unwrap(), raw);
    }

    #[test]
    fn test_split_truncates_joint_outputs_only() {
        let raw = array![0.1, 0.2, 0.3, 0.4];
        assert_eq!(split_own_action(&raw, 2, true).unwrap(), array![0.1, 0.2]);
        assert!(split_own_action(&raw, 2, false).is_err());
        assert!(split_own_action(&array![0.1], 2, true).is_err());
    }

    #[test]
    fn test_kind_flags() {
        assert!(!PolicyKind::Independent.is_joint());
        assert!(PolicyKind::Joint.is_joint());
        assert!(PolicyKind::OpponentModelling.is_joint());
        assert!(PolicyKind::OpponentModelling.is_opponent_modelling());
    }

    #[test]
    fn test_noise_clips_and_respects_zero_level() {
        let mut noise = GaussianNoise::new(0.0, 1);
        let mut action = array![0.5, -2.0];
        noise.perturb(&mut action);
        assert_eq!(action, array![0.5, -1.0]);

        noise.set_level(10.0);
        let mut action = array![0.0, 0.0, 0.0];
        noise.perturb(&mut action);
        assert!(action.iter().all(|a| (-1.0..=1.0).contains(a)));
    }

    #[test]
    fn test_variant_capability() {
        let mut uniform: PolicyVariant = UniformPolicy::new(3, 2, 0).into();
        assert!(uniform.noise_control().is_none());

        let mut rng = <StdRng as SeedableRng>::seed_from_u64(0);
        let mut det: PolicyVariant =
            DeterministicPolicy::new(3, 2, &[8], PolicyKind::Independent, 0.1, 0, &mut rng).unwrap().into();
        let control = det.noise_control().unwrap();
        control.set_noise_level(0.3);
        assert!((control.noise_level() - 0.3).abs() < 1e-6);
    }
}
