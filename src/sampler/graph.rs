use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis};
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use super::{Sampler, SamplerConfig};
use crate::env::MultiAgentEnv;
use crate::error::{MarlError, Result};
use crate::graph::{compute_messages, CommunicationGraph, GraphSample};
use crate::logger::{TabularLogger, TracingLogger};
use crate::policy::{split_own_action, Policy, PolicyVariant};
use crate::pool::{Batch, ReplayPool, Transition};

/// Whether next-state messages computed at the end of a tick replace the
/// messages computed at the start of the following tick.
///
/// Under `Reuse` a stored observation comes from the previous tick's matrix
/// while the stored adjacency is the fresh one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MessageCache {
    Reuse,
    #[default]
    Disabled,
}

/// One agent as seen by the sampler: its acting policy and the pool it fills.
#[derive(Clone, Debug)]
pub struct SamplerAgent {
    pub policy: PolicyVariant,
    pub pool: ReplayPool,
}

impl SamplerAgent {
    pub fn new(policy: PolicyVariant, pool: ReplayPool) -> Self {
        SamplerAgent { policy, pool }
    }
}

/// Cross-tick state of a [`GraphSampler`].
#[derive(Clone, Debug)]
pub struct GraphSamplerState {
    pub current_observations: Option<Vec<Array1<f32>>>,
    pub cached_next_messages: Option<Array2<f32>>,
    pub path_length: usize,
    pub path_return: Array1<f32>,
    pub last_path_return: Array1<f32>,
    pub max_path_return: Array1<f32>,
    pub mean_path_return: Array1<f32>,
    pub episode_count: usize,
    pub total_samples: usize,
}

impl GraphSamplerState {
    fn new(agent_count: usize) -> Self {
        GraphSamplerState {
            current_observations: None,
            cached_next_messages: None,
            path_length: 0,
            path_return: Array1::zeros(agent_count),
            last_path_return: Array1::zeros(agent_count),
            max_path_return: Array1::from_elem(agent_count, f32::NEG_INFINITY),
            mean_path_return: Array1::zeros(agent_count),
            episode_count: 0,
            total_samples: 0,
        }
    }
}

/// Communication tensors for one joint observation.
struct Communication {
    sample: GraphSample,
    messages: Array2<f32>,
}

/// Multi-agent sampler that routes observations through a communication graph.
///
/// Every tick the concatenated observation of all agents goes through the graph,
/// each agent acts on its message row `(A x hidden)[i]` instead of its raw
/// observation, and the transitions stored per agent carry messages in place of
/// observations together with copies of the tick's communication matrix and
/// log-probabilities.
pub struct GraphSampler {
    config: SamplerConfig,
    graph: Box<dyn CommunicationGraph>,
    env: Option<Box<dyn MultiAgentEnv>>,
    agents: Vec<SamplerAgent>,
    observation_dim: usize,
    action_dims: Vec<usize>,
    message_cache: MessageCache,
    state: GraphSamplerState,
    logger: Box<dyn TabularLogger>,
}

impl GraphSampler {
    pub fn new(config: SamplerConfig, graph: Box<dyn CommunicationGraph>) -> Result<Self> {
        config.validate()?;
        let agent_count = graph.agent_count();
        Ok(GraphSampler {
            config,
            graph,
            env: None,
            agents: Vec::new(),
            observation_dim: 0,
            action_dims: Vec::new(),
            message_cache: MessageCache::default(),
            state: GraphSamplerState::new(agent_count),
            logger: Box::new(TracingLogger::new()),
        })
    }

    pub fn with_message_cache(mut self, message_cache: MessageCache) -> Self {
        self.message_cache = message_cache;
        self
    }

    /// Where episode diagnostics go when an episode ends.
    pub fn with_logger(mut self, logger: Box<dyn TabularLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Bind the environment and one agent per environment slot.
    pub fn initialize(&mut self, env: Box<dyn MultiAgentEnv>, agents: Vec<SamplerAgent>) -> Result<()> {
        let n = env.agent_count();
        MarlError::check_len("agent list", n, agents.len())?;
        MarlError::check_len("graph agents", n, self.graph.agent_count())?;

        let observation_dims = env.observation_dims();
        let action_dims = env.action_dims();
        MarlError::check_len("observation dims", n, observation_dims.len())?;
        MarlError::check_len("action dims", n, action_dims.len())?;

        let observation_dim = observation_dims.first().copied().unwrap_or(0);
        if observation_dims.iter().any(|&d| d != observation_dim) {
            return Err(MarlError::invalid_parameter(
                "env".to_string(),
                format!("messages need equal observation sizes, got {:?}", observation_dims),
            ));
        }
        MarlError::check_len("graph input", n * observation_dim, self.graph.input_dim())?;

        let total_action_dim: usize = action_dims.iter().sum();
        for (i, agent) in agents.iter().enumerate() {
            Self::check_policy(&agent.policy, observation_dim, action_dims[i])?;
            let spec = agent.pool.spec();
            MarlError::check_len("pool observation", observation_dim, spec.observation_dim)?;
            MarlError::check_len("pool action", action_dims[i], spec.action_dim)?;
            if let Some(dim) = spec.opponent_action_dim {
                MarlError::check_len("pool opponent action", total_action_dim - action_dims[i], dim)?;
            }
            if let Some(graph_agents) = spec.graph_agents {
                MarlError::check_len("pool graph snapshot", n, graph_agents)?;
            }
        }

        info!(agents = n, observation_dim, "graph sampler initialized");
        self.env = Some(env);
        self.agents = agents;
        self.observation_dim = observation_dim;
        self.action_dims = action_dims;
        self.state = GraphSamplerState::new(n);
        Ok(())
    }

    fn check_policy(policy: &PolicyVariant, observation_dim: usize, action_dim: usize) -> Result<()> {
        MarlError::check_len("policy observation", observation_dim, policy.observation_dim())?;
        MarlError::check_len("policy action", action_dim, policy.action_dim())?;
        if !policy.kind().is_joint() {
            MarlError::check_len("independent policy output", action_dim, policy.output_dim())?;
        }
        Ok(())
    }

    /// Rebind every agent's acting policy, in agent order.
    pub fn set_policies(&mut self, policies: Vec<PolicyVariant>) -> Result<()> {
        MarlError::check_len("policy list", self.agents.len(), policies.len())?;
        for (i, policy) in policies.iter().enumerate() {
            Self::check_policy(policy, self.observation_dim, self.action_dims[i])?;
        }
        for (agent, policy) in self.agents.iter_mut().zip(policies) {
            agent.policy = policy;
        }
        Ok(())
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn agents(&self) -> &[SamplerAgent] {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut [SamplerAgent] {
        &mut self.agents
    }

    pub fn pool(&self, agent: usize) -> Option<&ReplayPool> {
        self.agents.get(agent).map(|a| &a.pool)
    }

    pub fn graph(&self) -> &dyn CommunicationGraph {
        &*self.graph
    }

    pub fn graph_mut(&mut self) -> &mut dyn CommunicationGraph {
        &mut *self.graph
    }

    pub fn state(&self) -> &GraphSamplerState {
        &self.state
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// One batch per agent drawn at the same row indices: agent 0 samples,
    /// the others follow its indices.
    pub fn random_joint_batch(&mut self) -> Result<Vec<Batch>> {
        let batch_size = self.config.batch_size;
        let (first, rest) = self
            .agents
            .split_first_mut()
            .ok_or_else(|| MarlError::NotInitialized("no agents bound".to_string()))?;
        let lead = first.pool.random_batch(batch_size)?;

        let mut batches = Vec::with_capacity(rest.len() + 1);
        for agent in rest.iter() {
            batches.push(agent.pool.random_batch_by_indices(&lead.indices)?);
        }
        batches.insert(0, lead);
        Ok(batches)
    }

    /// The last `batch_size` rows written, one batch per agent.
    pub fn recent_joint_batch(&self) -> Result<Vec<Batch>> {
        let first = self
            .agents
            .first()
            .ok_or_else(|| MarlError::NotInitialized("no agents bound".to_string()))?;
        let indices = first.pool.recent_indices(self.config.batch_size);
        if indices.is_empty() {
            return Err(MarlError::EmptyBuffer("no transitions written yet".to_string()));
        }
        self.agents
            .iter()
            .map(|agent| agent.pool.random_batch_by_indices(&indices))
            .collect()
    }

    fn full_observation(&self, observations: &[Array1<f32>]) -> Result<Array1<f32>> {
        MarlError::check_len("observation list", self.agents.len(), observations.len())?;
        for observation in observations {
            MarlError::check_len("agent observation", self.observation_dim, observation.len())?;
        }
        let views: Vec<ArrayView1<f32>> = observations.iter().map(|o| o.view()).collect();
        Ok(concatenate(Axis(0), &views)?)
    }

    fn communicate(&mut self, observations: &[Array1<f32>]) -> Result<Communication> {
        let full = self.full_observation(observations)?;
        let sample = self.graph.forward(full.view())?;
        let hidden = full.into_shape((self.agents.len(), self.observation_dim))?;
        let messages = compute_messages(sample.matrix.view(), hidden.view())?;
        Ok(Communication { sample, messages })
    }

    fn end_episode(&mut self) -> Result<()> {
        let env = self
            .env
            .as_mut()
            .ok_or_else(|| MarlError::NotInitialized("no environment bound".to_string()))?;
        let observations = env.reset()?;

        let state = &mut self.state;
        state.max_path_return.zip_mut_with(&state.path_return, |m, &r| *m = m.max(r));
        state.mean_path_return = &state.path_return / state.path_length.max(1) as f32;
        state.last_path_return = state.path_return.clone();
        state.path_return.fill(0.0);
        state.path_length = 0;
        state.episode_count += 1;
        state.cached_next_messages = None;
        state.current_observations = Some(observations);

        debug!(episode = state.episode_count, "episode finished");
        let mut logger = std::mem::replace(&mut self.logger, Box::new(TracingLogger::new()));
        self.log_diagnostics(&mut *logger);
        logger.dump();
        self.logger = logger;
        Ok(())
    }
}

impl Sampler for GraphSampler {
    fn sample(&mut self) -> Result<()> {
        if self.env.is_none() || self.agents.is_empty() {
            return Err(MarlError::NotInitialized("call initialize() before sample()".to_string()));
        }

        let observations = match self.state.current_observations.take() {
            Some(observations) => observations,
            None => match self.env.as_mut() {
                Some(env) => env.reset()?,
                None => return Err(MarlError::NotInitialized("no environment bound".to_string())),
            },
        };

        let Communication { sample, mut messages } = self.communicate(&observations)?;
        if self.message_cache == MessageCache::Reuse {
            if let Some(cached) = self.state.cached_next_messages.take() {
                messages = cached;
            }
        }

        let mut actions = Vec::with_capacity(self.agents.len());
        for (i, agent) in self.agents.iter_mut().enumerate() {
            let (raw, _) = agent.policy.get_action(messages.row(i))?;
            actions.push(split_own_action(&raw, self.action_dims[i], agent.policy.kind().is_joint())?);
        }

        let step = match self.env.as_mut() {
            Some(env) => env.step(&actions)?,
            None => return Err(MarlError::NotInitialized("no environment bound".to_string())),
        };
        let n = self.agents.len();
        MarlError::check_len("rewards", n, step.rewards.len())?;
        MarlError::check_len("done flags", n, step.dones.len())?;

        self.state.path_length += 1;
        self.state.path_return += &Array1::from(step.rewards.clone());
        self.state.total_samples += 1;

        let next = self.communicate(&step.observations)?;

        for (i, agent) in self.agents.iter_mut().enumerate() {
            let mut transition = Transition::new(
                messages.row(i).to_owned(),
                actions[i].clone(),
                step.rewards[i],
                step.dones[i],
                next.messages.row(i).to_owned(),
            );
            if agent.pool.is_joint() {
                let others: Vec<ArrayView1<f32>> = actions
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .map(|(_, a)| a.view())
                    .collect();
                transition = transition.with_opponent_action(concatenate(Axis(0), &others)?);
            }
            if agent.pool.stores_graph() {
                transition = transition.with_graph(sample.matrix.clone(), sample.log_probs.clone());
            }
            agent.pool.add_sample(&transition)?;
        }

        if step.all_done() || self.state.path_length >= self.config.max_path_length {
            self.end_episode()?;
        } else {
            self.state.current_observations = Some(step.observations);
            if self.message_cache == MessageCache::Reuse {
                self.state.cached_next_messages = Some(next.messages);
            }
        }
        Ok(())
    }

    fn batch_ready(&self) -> bool {
        !self.agents.is_empty()
            && self
                .agents
                .iter()
                .all(|agent| agent.pool.size() >= self.config.min_pool_size)
    }

    fn random_batch(&mut self, agent: usize) -> Result<Batch> {
        let batch_size = self.config.batch_size;
        match self.agents.get_mut(agent) {
            Some(agent) => agent.pool.random_batch(batch_size),
            None => Err(MarlError::invalid_parameter(
                "agent".to_string(),
                format!("no agent {}", agent),
            )),
        }
    }

    fn terminate(&mut self) -> Result<()> {
        match self.env.as_mut() {
            Some(env) => env.terminate(),
            None => Ok(()),
        }
    }

    fn log_diagnostics(&self, logger: &mut dyn TabularLogger) {
        let smallest = self.agents.iter().map(|agent| agent.pool.size()).min().unwrap_or(0);
        logger.record("pool-size", smallest as f32);
        for i in 0..self.agents.len() {
            logger.record(&format!("pool-size_agent_{}", i), self.agents[i].pool.size() as f32);
            logger.record(&format!("max-path-return_agent_{}", i), self.state.max_path_return[i]);
            logger.record(&format!("mean-path-return_agent_{}", i), self.state.mean_path_return[i]);
            logger.record(&format!("last-path-return_agent_{}", i), self.state.last_path_return[i]);
        }
        logger.record("episodes", self.state.episode_count as f32);
        logger.record("total-samples", self.state.total_samples as f32);
    }
}
