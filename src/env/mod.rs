//! # Environments
//!
//! Environment adapters the samplers drive. Single-agent environments implement
//! [`Env`]; shared multi-agent worlds implement [`MultiAgentEnv`] and report one
//! observation, reward and done flag per agent.

pub mod navigation;

use ndarray::{Array1, ArrayView1};
use std::collections::HashMap;

use crate::error::{MarlError, Result};

pub use navigation::CooperativeNavigation;

/// Free-form scalar diagnostics returned by a step.
pub type EnvInfo = HashMap<String, f32>;

/// Result of one single-agent environment step.
#[derive(Clone, Debug)]
pub struct Step {
    pub observation: Array1<f32>,
    pub reward: f32,
    pub done: bool,
    pub info: EnvInfo,
}

/// Result of one multi-agent environment step, indexed by agent.
#[derive(Clone, Debug)]
pub struct MultiStep {
    pub observations: Vec<Array1<f32>>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
    pub info: EnvInfo,
}

impl MultiStep {
    pub fn all_done(&self) -> bool {
        !self.dones.is_empty() && self.dones.iter().all(|&d| d)
    }
}

pub trait Env {
    fn observation_dim(&self) -> usize;
    fn action_dim(&self) -> usize;
    fn reset(&mut self) -> Result<Array1<f32>>;
    fn step(&mut self, action: ArrayView1<f32>) -> Result<Step>;

    /// Release any resources. Safe to call at any time.
    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait MultiAgentEnv {
    fn agent_count(&self) -> usize;
    fn observation_dims(&self) -> Vec<usize>;
    fn action_dims(&self) -> Vec<usize>;
    fn reset(&mut self) -> Result<Vec<Array1<f32>>>;

    /// Step every agent at once; `actions[i]` belongs to agent `i`.
    fn step(&mut self, actions: &[Array1<f32>]) -> Result<MultiStep>;

    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<E: MultiAgentEnv + ?Sized> MultiAgentEnv for Box<E> {
    fn agent_count(&self) -> usize {
        (**self).agent_count()
    }

    fn observation_dims(&self) -> Vec<usize> {
        (**self).observation_dims()
    }

    fn action_dims(&self) -> Vec<usize> {
        (**self).action_dims()
    }

    fn reset(&mut self) -> Result<Vec<Array1<f32>>> {
        (**self).reset()
    }

    fn step(&mut self, actions: &[Array1<f32>]) -> Result<MultiStep> {
        (**self).step(actions)
    }

    fn terminate(&mut self) -> Result<()> {
        (**self).terminate()
    }
}

/// Exposes a one-agent [`MultiAgentEnv`] through the single-agent [`Env`] interface.
pub struct SingleAgent<E> {
    env: E,
}

impl<E: MultiAgentEnv> SingleAgent<E> {
    pub fn new(env: E) -> Result<Self> {
        if env.agent_count() != 1 {
            return Err(MarlError::invalid_parameter(
                "env".to_string(),
                format!("expected exactly one agent, found {}", env.agent_count()),
            ));
        }
        Ok(SingleAgent { env })
    }

    pub fn into_inner(self) -> E {
        self.env
    }
}

fn only<T>(mut values: Vec<T>, what: &str) -> Result<T> {
    match values.len() {
        1 => values.pop().ok_or_else(|| MarlError::Environment(format!("missing {}", what))),
        n => Err(MarlError::Environment(format!("expected one {}, got {}", what, n))),
    }
}

impl<E: MultiAgentEnv> Env for SingleAgent<E> {
    fn observation_dim(&self) -> usize {
        self.env.observation_dims().first().copied().unwrap_or(0)
    }

    fn action_dim(&self) -> usize {
        self.env.action_dims().first().copied().unwrap_or(0)
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        only(self.env.reset()?, "observation")
    }

    fn step(&mut self, action: ArrayView1<f32>) -> Result<Step> {
        let step = self.env.step(&[action.to_owned()])?;
        Ok(Step {
            observation: only(step.observations, "observation")?,
            reward: only(step.rewards, "reward")?,
            done: only(step.dones, "done flag")?,
            info: step.info,
        })
    }

    fn terminate(&mut self) -> Result<()> {
        self.env.terminate()
    }
}
