use ndarray::{s, Array1, Array2};

use crate::env::{Env, EnvInfo};
use crate::error::{MarlError, Result};
use crate::policy::{split_own_action, AgentInfo, Policy};

/// One recorded episode. Every column has one row per step taken.
#[derive(Clone, Debug)]
pub struct Path {
    pub observations: Array2<f32>,
    pub actions: Array2<f32>,
    pub rewards: Array1<f32>,
    pub terminals: Array1<bool>,
    /// `observations` shifted by one step, ending with the final observation
    pub next_observations: Array2<f32>,
    pub agent_infos: Vec<AgentInfo>,
    pub env_infos: Vec<EnvInfo>,
}

impl Path {
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    pub fn total_return(&self) -> f32 {
        self.rewards.sum()
    }
}

/// Run one episode of at most `max_length` steps, stopping early on a terminal step.
pub fn rollout<E, P>(env: &mut E, policy: &mut P, max_length: usize) -> Result<Path>
where
    E: Env + ?Sized,
    P: Policy + ?Sized,
{
    if max_length == 0 {
        return Err(MarlError::invalid_parameter("max_length", "must be positive"));
    }
    let observation_dim = env.observation_dim();
    let action_dim = env.action_dim();
    let joint = policy.kind().is_joint();

    let mut observation = env.reset()?;
    policy.reset();

    let mut observations = Array2::zeros((max_length + 1, observation_dim));
    let mut actions = Array2::zeros((max_length, action_dim));
    let mut rewards = Array1::zeros(max_length);
    let mut terminals = Array1::from_elem(max_length, false);
    let mut agent_infos = Vec::with_capacity(max_length);
    let mut env_infos = Vec::with_capacity(max_length);

    let mut t = 0;
    loop {
        MarlError::check_len("observation", observation_dim, observation.len())?;
        let (raw, agent_info) = policy.get_action(observation.view())?;
        let action = split_own_action(&raw, action_dim, joint)?;
        let step = env.step(action.view())?;

        observations.row_mut(t).assign(&observation);
        actions.row_mut(t).assign(&action);
        rewards[t] = step.reward;
        terminals[t] = step.done;
        agent_infos.push(agent_info);
        env_infos.push(step.info);

        observation = step.observation;
        if step.done || t + 1 == max_length {
            break;
        }
        t += 1;
    }
    MarlError::check_len("observation", observation_dim, observation.len())?;
    observations.row_mut(t + 1).assign(&observation);

    let steps = t + 1;
    Ok(Path {
        next_observations: observations.slice(s![1..steps + 1, ..]).to_owned(),
        observations: observations.slice(s![..steps, ..]).to_owned(),
        actions: actions.slice(s![..steps, ..]).to_owned(),
        rewards: rewards.slice(s![..steps]).to_owned(),
        terminals: terminals.slice(s![..steps]).to_owned(),
        agent_infos,
        env_infos,
    })
}

pub fn rollouts<E, P>(env: &mut E, policy: &mut P, max_length: usize, n_paths: usize) -> Result<Vec<Path>>
where
    E: Env + ?Sized,
    P: Policy + ?Sized,
{
    (0..n_paths).map(|_| rollout(env, policy, max_length)).collect()
}
