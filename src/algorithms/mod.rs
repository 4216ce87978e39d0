//! # Learners
//!
//! Off-policy actor-critic learners trained from the replay pools the samplers
//! fill. One learner per agent; the training loop assembles a [`TrainingBatch`]
//! per agent from batches drawn at shared row indices.
//!
//! - **Independent**: DDPG on the agent's own observation and action
//! - **Joint**: centralized critic over every agent's action (MADDPG style)
//! - **OpponentModelling**: centralized critic plus a learned opponent model
//!   used by the policy's k-level reasoning

pub mod ddpg;

use ndarray::{Array1, Array2, ArrayView2};

use crate::error::Result;
use crate::policy::{PolicyKind, PolicyVariant};
use crate::pool::Batch;

pub use ddpg::{DdpgConfig, DdpgLearner};

/// Everything one learner needs for one update.
#[derive(Clone, Debug)]
pub struct TrainingBatch {
    /// The agent's own rows
    pub batch: Batch,
    /// Other agents' actions at the same rows, self excluded. Falls back to
    /// the pool's stored opponent actions when `None`.
    pub opponent_actions: Option<Array2<f32>>,
    /// Other agents' actions at the next observations
    pub opponent_next_actions: Option<Array2<f32>>,
    /// The agent's most recently written rows, for opponent-model regression
    pub recent: Option<Batch>,
}

impl TrainingBatch {
    pub fn new(batch: Batch) -> Self {
        TrainingBatch {
            batch,
            opponent_actions: None,
            opponent_next_actions: None,
            recent: None,
        }
    }

    pub fn with_opponent_actions(mut self, actions: Array2<f32>) -> Self {
        self.opponent_actions = Some(actions);
        self
    }

    pub fn with_opponent_next_actions(mut self, actions: Array2<f32>) -> Self {
        self.opponent_next_actions = Some(actions);
        self
    }

    pub fn with_recent(mut self, recent: Batch) -> Self {
        self.recent = Some(recent);
        self
    }
}

/// Losses of one update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LearnerStats {
    pub critic_loss: f32,
    /// `None` when the actor update was delayed
    pub actor_loss: Option<f32>,
    pub opponent_loss: Option<f32>,
    pub q_mean: f32,
}

pub trait Learner {
    fn kind(&self) -> PolicyKind;

    fn policy(&self) -> &PolicyVariant;
    fn policy_mut(&mut self) -> &mut PolicyVariant;

    /// A copy of the acting policy for the sampler, with a fresh noise seed.
    fn snapshot_policy(&mut self) -> PolicyVariant;

    /// Noise-free target-policy actions for a batch of next observations.
    fn target_actions(&self, next_observations: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Target opponent-model guesses of the other agents' actions. `None`
    /// for learners without an opponent model.
    fn predict_opponent_actions(&self, observations: ArrayView2<f32>) -> Result<Option<Array2<f32>>>;

    fn train(&mut self, iteration: usize, batch: &TrainingBatch) -> Result<LearnerStats>;

    /// Critic values of the stored actions, one per row.
    fn q_values(&self, batch: &TrainingBatch) -> Result<Array1<f32>>;

    fn q_mean(&self, batch: &TrainingBatch) -> Result<f32> {
        Ok(self.q_values(batch)?.mean().unwrap_or(0.0))
    }
}
