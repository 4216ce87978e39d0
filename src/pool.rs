use ndarray::{Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Serialize, Deserialize};

use crate::error::{MarlError, Result};

/// One agent's experience for a single environment step.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub observation: Array1<f32>,
    pub action: Array1<f32>,
    pub reward: f32,
    pub terminal: bool,
    pub next_observation: Array1<f32>,
    /// Actions of every other agent, self excluded, in agent order
    pub opponent_action: Option<Array1<f32>>,
    pub adjacency: Option<Array2<f32>>,
    pub log_adjacency: Option<Array2<f32>>,
}

impl Transition {
    pub fn new(
        observation: Array1<f32>,
        action: Array1<f32>,
        reward: f32,
        terminal: bool,
        next_observation: Array1<f32>,
    ) -> Self {
        Transition {
            observation,
            action,
            reward,
            terminal,
            next_observation,
            opponent_action: None,
            adjacency: None,
            log_adjacency: None,
        }
    }

    pub fn with_opponent_action(mut self, opponent_action: Array1<f32>) -> Self {
        self.opponent_action = Some(opponent_action);
        self
    }

    pub fn with_graph(mut self, adjacency: Array2<f32>, log_adjacency: Array2<f32>) -> Self {
        self.adjacency = Some(adjacency);
        self.log_adjacency = Some(log_adjacency);
        self
    }
}

/// Shape of the transitions a pool stores.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PoolSpec {
    pub capacity: usize,
    pub observation_dim: usize,
    pub action_dim: usize,
    /// `Some` for joint pools
    pub opponent_action_dim: Option<usize>,
    /// `Some(n)` to keep n x n communication snapshots
    pub graph_agents: Option<usize>,
}

impl PoolSpec {
    pub fn new(capacity: usize, observation_dim: usize, action_dim: usize) -> Self {
        PoolSpec {
            capacity,
            observation_dim,
            action_dim,
            opponent_action_dim: None,
            graph_agents: None,
        }
    }

    pub fn with_opponent_actions(mut self, opponent_action_dim: usize) -> Self {
        self.opponent_action_dim = Some(opponent_action_dim);
        self
    }

    pub fn with_graph(mut self, agent_count: usize) -> Self {
        self.graph_agents = Some(agent_count);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(MarlError::invalid_parameter("capacity", "must be positive"));
        }
        if self.observation_dim == 0 {
            return Err(MarlError::invalid_parameter("observation_dim", "must be positive"));
        }
        if self.action_dim == 0 {
            return Err(MarlError::invalid_parameter("action_dim", "must be positive"));
        }
        if self.opponent_action_dim == Some(0) {
            return Err(MarlError::invalid_parameter("opponent_action_dim", "must be positive when set"));
        }
        if self.graph_agents == Some(0) {
            return Err(MarlError::invalid_parameter("graph_agents", "must be positive when set"));
        }
        Ok(())
    }
}

/// Rows drawn from a pool, one column per transition field.
#[derive(Clone, Debug)]
pub struct Batch {
    pub indices: Vec<usize>,
    pub observations: Array2<f32>,
    pub actions: Array2<f32>,
    pub rewards: Array1<f32>,
    pub terminals: Array1<bool>,
    pub next_observations: Array2<f32>,
    pub opponent_actions: Option<Array2<f32>>,
    pub adjacency: Option<Array3<f32>>,
    pub log_adjacency: Option<Array3<f32>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Read row `i` back as a transition.
    pub fn transition(&self, i: usize) -> Result<Transition> {
        if i >= self.len() {
            return Err(MarlError::invalid_parameter(
                "index".to_string(),
                format!("{} out of range for batch of {}", i, self.len()),
            ));
        }
        Ok(Transition {
            observation: self.observations.row(i).to_owned(),
            action: self.actions.row(i).to_owned(),
            reward: self.rewards[i],
            terminal: self.terminals[i],
            next_observation: self.next_observations.row(i).to_owned(),
            opponent_action: self.opponent_actions.as_ref().map(|o| o.row(i).to_owned()),
            adjacency: self.adjacency.as_ref().map(|a| a.index_axis(Axis(0), i).to_owned()),
            log_adjacency: self.log_adjacency.as_ref().map(|a| a.index_axis(Axis(0), i).to_owned()),
        })
    }
}

/// Fixed-capacity circular replay pool with preallocated columns.
#[derive(Clone, Debug)]
pub struct ReplayPool {
    spec: PoolSpec,
    observations: Array2<f32>,
    actions: Array2<f32>,
    rewards: Array1<f32>,
    terminals: Array1<bool>,
    next_observations: Array2<f32>,
    opponent_actions: Option<Array2<f32>>,
    adjacency: Option<Array3<f32>>,
    log_adjacency: Option<Array3<f32>>,
    top: usize,
    size: usize,
    last_indices: Vec<usize>,
    rng: StdRng,
}

impl ReplayPool {
    pub fn new(spec: PoolSpec, seed: u64) -> Result<Self> {
        spec.validate()?;
        let capacity = spec.capacity;
        let graph_shape = spec.graph_agents.map(|n| (capacity, n, n));
        Ok(ReplayPool {
            observations: Array2::zeros((capacity, spec.observation_dim)),
            actions: Array2::zeros((capacity, spec.action_dim)),
            rewards: Array1::zeros(capacity),
            terminals: Array1::from_elem(capacity, false),
            next_observations: Array2::zeros((capacity, spec.observation_dim)),
            opponent_actions: spec.opponent_action_dim.map(|d| Array2::zeros((capacity, d))),
            adjacency: graph_shape.map(|shape| Array3::zeros(shape)),
            log_adjacency: graph_shape.map(|shape| Array3::zeros(shape)),
            top: 0,
            size: 0,
            last_indices: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            spec,
        })
    }

    pub fn spec(&self) -> &PoolSpec {
        &self.spec
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.spec.capacity
    }

    pub fn is_joint(&self) -> bool {
        self.spec.opponent_action_dim.is_some()
    }

    pub fn stores_graph(&self) -> bool {
        self.spec.graph_agents.is_some()
    }

    /// Indices drawn by the most recent `random_batch`.
    pub fn last_indices(&self) -> &[usize] {
        &self.last_indices
    }

    /// Copy `transition` into the next slot, overwriting the oldest row once full.
    pub fn add_sample(&mut self, transition: &Transition) -> Result<()> {
        self.check(transition)?;
        let row = self.top;

        self.observations.row_mut(row).assign(&transition.observation);
        self.actions.row_mut(row).assign(&transition.action);
        self.rewards[row] = transition.reward;
        self.terminals[row] = transition.terminal;
        self.next_observations.row_mut(row).assign(&transition.next_observation);

        if let (Some(column), Some(value)) = (self.opponent_actions.as_mut(), transition.opponent_action.as_ref()) {
            column.row_mut(row).assign(value);
        }
        if let (Some(column), Some(value)) = (self.adjacency.as_mut(), transition.adjacency.as_ref()) {
            column.index_axis_mut(Axis(0), row).assign(value);
        }
        if let (Some(column), Some(value)) = (self.log_adjacency.as_mut(), transition.log_adjacency.as_ref()) {
            column.index_axis_mut(Axis(0), row).assign(value);
        }

        self.top = (self.top + 1) % self.spec.capacity;
        self.size = (self.size + 1).min(self.spec.capacity);
        Ok(())
    }

    fn check(&self, transition: &Transition) -> Result<()> {
        MarlError::check_len("observation", self.spec.observation_dim, transition.observation.len())?;
        MarlError::check_len("next observation", self.spec.observation_dim, transition.next_observation.len())?;
        MarlError::check_len("action", self.spec.action_dim, transition.action.len())?;

        match (self.spec.opponent_action_dim, transition.opponent_action.as_ref()) {
            (Some(dim), Some(value)) => MarlError::check_len("opponent action", dim, value.len())?,
            (None, None) => {}
            (Some(dim), None) => {
                return Err(MarlError::dimension_mismatch(
                    format!("opponent action of length {}", dim),
                    "none".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(MarlError::invalid_parameter(
                    "opponent_action",
                    "pool does not store opponent actions",
                ))
            }
        }

        let snapshots = [transition.adjacency.as_ref(), transition.log_adjacency.as_ref()];
        match self.spec.graph_agents {
            Some(n) => {
                for snapshot in snapshots {
                    match snapshot {
                        Some(matrix) if matrix.dim() == (n, n) => {}
                        Some(matrix) => {
                            return Err(MarlError::dimension_mismatch(
                                format!("{}x{} snapshot", n, n),
                                format!("{:?}", matrix.dim()),
                            ))
                        }
                        None => {
                            return Err(MarlError::dimension_mismatch(
                                format!("{}x{} snapshot", n, n),
                                "none".to_string(),
                            ))
                        }
                    }
                }
            }
            None => {
                if snapshots.iter().any(Option::is_some) {
                    return Err(MarlError::invalid_parameter(
                        "adjacency",
                        "pool does not store communication snapshots",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Uniformly sample `batch_size` rows with replacement and remember their indices.
    pub fn random_batch(&mut self, batch_size: usize) -> Result<Batch> {
        if self.size == 0 {
            return Err(MarlError::EmptyBuffer("cannot sample from an empty pool".to_string()));
        }
        let size = self.size;
        let rng = &mut self.rng;
        let indices: Vec<usize> = (0..batch_size).map(|_| rng.gen_range(0..size)).collect();
        let batch = self.random_batch_by_indices(&indices)?;
        self.last_indices = indices;
        Ok(batch)
    }

    pub fn random_batch_by_indices(&self, indices: &[usize]) -> Result<Batch> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.size) {
            return Err(MarlError::invalid_parameter(
                "indices".to_string(),
                format!("index {} out of range for pool of size {}", bad, self.size),
            ));
        }

        Ok(Batch {
            indices: indices.to_vec(),
            observations: self.observations.select(Axis(0), indices),
            actions: self.actions.select(Axis(0), indices),
            rewards: self.rewards.select(Axis(0), indices),
            terminals: self.terminals.select(Axis(0), indices),
            next_observations: self.next_observations.select(Axis(0), indices),
            opponent_actions: self.opponent_actions.as_ref().map(|c| c.select(Axis(0), indices)),
            adjacency: self.adjacency.as_ref().map(|c| c.select(Axis(0), indices)),
            log_adjacency: self.log_adjacency.as_ref().map(|c| c.select(Axis(0), indices)),
        })
    }

    /// Indices of the last `n` rows written, oldest first.
    pub fn recent_indices(&self, n: usize) -> Vec<usize> {
        let n = n.min(self.size);
        let capacity = self.spec.capacity;
        (0..n).map(|k| (self.top + capacity - n + k) % capacity).collect()
    }
}
