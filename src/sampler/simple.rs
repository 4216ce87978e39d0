use ndarray::Array1;

use super::{Sampler, SamplerConfig};
use crate::env::Env;
use crate::error::{MarlError, Result};
use crate::logger::TabularLogger;
use crate::policy::{split_own_action, Policy, PolicyVariant};
use crate::pool::{Batch, ReplayPool, Transition};

/// Cross-tick state of a [`SimpleSampler`].
#[derive(Clone, Debug)]
pub struct SimpleSamplerState {
    pub current_observation: Option<Array1<f32>>,
    pub path_length: usize,
    pub path_return: f32,
    pub last_path_return: f32,
    pub max_path_return: f32,
    pub episode_count: usize,
    pub total_samples: usize,
}

impl Default for SimpleSamplerState {
    fn default() -> Self {
        SimpleSamplerState {
            current_observation: None,
            path_length: 0,
            path_return: 0.0,
            last_path_return: 0.0,
            max_path_return: f32::NEG_INFINITY,
            episode_count: 0,
            total_samples: 0,
        }
    }
}

/// Single-agent step sampler.
pub struct SimpleSampler {
    config: SamplerConfig,
    env: Option<Box<dyn Env>>,
    policy: Option<PolicyVariant>,
    pool: Option<ReplayPool>,
    state: SimpleSamplerState,
}

impl SimpleSampler {
    pub fn new(config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        Ok(SimpleSampler {
            config,
            env: None,
            policy: None,
            pool: None,
            state: SimpleSamplerState::default(),
        })
    }

    pub fn initialize(&mut self, env: Box<dyn Env>, policy: PolicyVariant, pool: ReplayPool) -> Result<()> {
        MarlError::check_len("policy observation", env.observation_dim(), policy.observation_dim())?;
        MarlError::check_len("policy action", env.action_dim(), policy.action_dim())?;
        MarlError::check_len("pool observation", env.observation_dim(), pool.spec().observation_dim)?;
        MarlError::check_len("pool action", env.action_dim(), pool.spec().action_dim)?;

        self.env = Some(env);
        self.policy = Some(policy);
        self.pool = Some(pool);
        self.state = SimpleSamplerState::default();
        Ok(())
    }

    pub fn set_policy(&mut self, policy: PolicyVariant) {
        self.policy = Some(policy);
    }

    pub fn state(&self) -> &SimpleSamplerState {
        &self.state
    }

    pub fn pool(&self) -> Option<&ReplayPool> {
        self.pool.as_ref()
    }
}

impl Sampler for SimpleSampler {
    fn sample(&mut self) -> Result<()> {
        let (env, policy, pool) = match (self.env.as_mut(), self.policy.as_mut(), self.pool.as_mut()) {
            (Some(env), Some(policy), Some(pool)) => (env, policy, pool),
            _ => return Err(MarlError::NotInitialized("call initialize() before sample()".to_string())),
        };

        let observation = match self.state.current_observation.take() {
            Some(observation) => observation,
            None => env.reset()?,
        };

        let (raw, _) = policy.get_action(observation.view())?;
        let action = split_own_action(&raw, env.action_dim(), policy.kind().is_joint())?;
        let step = env.step(action.view())?;

        self.state.path_length += 1;
        self.state.path_return += step.reward;
        self.state.total_samples += 1;

        pool.add_sample(&Transition::new(
            observation,
            action,
            step.reward,
            step.done,
            step.observation.clone(),
        ))?;

        if step.done || self.state.path_length >= self.config.max_path_length {
            policy.reset();
            self.state.current_observation = Some(env.reset()?);
            self.state.max_path_return = self.state.max_path_return.max(self.state.path_return);
            self.state.last_path_return = self.state.path_return;
            self.state.path_length = 0;
            self.state.path_return = 0.0;
            self.state.episode_count += 1;
        } else {
            self.state.current_observation = Some(step.observation);
        }
        Ok(())
    }

    fn batch_ready(&self) -> bool {
        self.pool
            .as_ref()
            .map_or(false, |pool| pool.size() >= self.config.min_pool_size)
    }

    fn random_batch(&mut self, agent: usize) -> Result<Batch> {
        if agent != 0 {
            return Err(MarlError::invalid_parameter(
                "agent".to_string(),
                format!("single-agent sampler has no agent {}", agent),
            ));
        }
        match self.pool.as_mut() {
            Some(pool) => pool.random_batch(self.config.batch_size),
            None => Err(MarlError::NotInitialized("no pool bound".to_string())),
        }
    }

    fn terminate(&mut self) -> Result<()> {
        match self.env.as_mut() {
            Some(env) => env.terminate(),
            None => Ok(()),
        }
    }

    fn log_diagnostics(&self, logger: &mut dyn TabularLogger) {
        logger.record("pool-size", self.pool.as_ref().map_or(0, ReplayPool::size) as f32);
        logger.record("max-path-return", self.state.max_path_return);
        logger.record("last-path-return", self.state.last_path_return);
        logger.record("episodes", self.state.episode_count as f32);
        logger.record("total-samples", self.state.total_samples as f32);
    }
}
