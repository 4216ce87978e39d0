use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{EnvInfo, MultiAgentEnv, MultiStep};
use crate::error::{MarlError, Result};

/// Cooperative navigation on the unit square.
///
/// `n` agents must spread over `n` landmarks. Every agent observes its own
/// position followed by the offset to each landmark, so observations have
/// `2 + 2n` entries. Actions are 2-d velocities clipped to `[-1, 1]`.
/// All agents share one reward: minus the summed distance from each landmark
/// to its closest agent, minus one per colliding pair.
#[derive(Clone, Debug)]
pub struct CooperativeNavigation {
    n_agents: usize,
    agent_positions: Array2<f32>,
    landmark_positions: Array2<f32>,
    step_size: f32,
    agent_radius: f32,
    horizon: Option<usize>,
    steps: usize,
    rng: StdRng,
}

impl CooperativeNavigation {
    pub fn new(n_agents: usize, seed: u64) -> Self {
        let mut env = CooperativeNavigation {
            n_agents,
            agent_positions: Array2::zeros((n_agents, 2)),
            landmark_positions: Array2::zeros((n_agents, 2)),
            step_size: 0.1,
            agent_radius: 0.05,
            horizon: None,
            steps: 0,
            rng: StdRng::seed_from_u64(seed),
        };
        env.scatter();
        env
    }

    /// Raise every done flag once `horizon` steps have been taken.
    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = Some(horizon);
        self
    }

    pub fn with_step_size(mut self, step_size: f32) -> Self {
        self.step_size = step_size;
        self
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    fn scatter(&mut self) {
        let rng = &mut self.rng;
        self.agent_positions.mapv_inplace(|_| rng.gen_range(-1.0..1.0));
        self.landmark_positions.mapv_inplace(|_| rng.gen_range(-1.0..1.0));
    }

    fn observation(&self, agent: usize) -> Array1<f32> {
        let own = self.agent_positions.row(agent);
        let mut obs = Array1::zeros(2 + 2 * self.n_agents);
        obs[0] = own[0];
        obs[1] = own[1];
        for (l, landmark) in self.landmark_positions.axis_iter(Axis(0)).enumerate() {
            obs[2 + 2 * l] = landmark[0] - own[0];
            obs[3 + 2 * l] = landmark[1] - own[1];
        }
        obs
    }

    fn observations(&self) -> Vec<Array1<f32>> {
        (0..self.n_agents).map(|i| self.observation(i)).collect()
    }

    fn distance(a: ndarray::ArrayView1<f32>, b: ndarray::ArrayView1<f32>) -> f32 {
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
    }

    fn coverage(&self) -> f32 {
        self.landmark_positions
            .axis_iter(Axis(0))
            .map(|landmark| {
                self.agent_positions
                    .axis_iter(Axis(0))
                    .map(|agent| Self::distance(agent, landmark))
                    .fold(f32::INFINITY, f32::min)
            })
            .sum()
    }

    fn collisions(&self) -> usize {
        let mut count = 0;
        for i in 0..self.n_agents {
            for j in (i + 1)..self.n_agents {
                let d = Self::distance(self.agent_positions.row(i), self.agent_positions.row(j));
                if d < 2.0 * self.agent_radius {
                    count += 1;
                }
            }
        }
        count
    }
}

impl MultiAgentEnv for CooperativeNavigation {
    fn agent_count(&self) -> usize {
        self.n_agents
    }

    fn observation_dims(&self) -> Vec<usize> {
        vec![2 + 2 * self.n_agents; self.n_agents]
    }

    fn action_dims(&self) -> Vec<usize> {
        vec![2; self.n_agents]
    }

    fn reset(&mut self) -> Result<Vec<Array1<f32>>> {
        self.steps = 0;
        self.scatter();
        Ok(self.observations())
    }

    fn step(&mut self, actions: &[Array1<f32>]) -> Result<MultiStep> {
        MarlError::check_len("action list", self.n_agents, actions.len())?;
        for (i, action) in actions.iter().enumerate() {
            MarlError::check_len("navigation action", 2, action.len())?;
            if action.iter().any(|a| !a.is_finite()) {
                return Err(MarlError::Environment(format!("agent {} sent a non-finite action", i)));
            }
            let mut position = self.agent_positions.row_mut(i);
            for d in 0..2 {
                position[d] = (position[d] + self.step_size * action[d].clamp(-1.0, 1.0)).clamp(-1.0, 1.0);
            }
        }
        self.steps += 1;

        let coverage = self.coverage();
        let collisions = self.collisions();
        let reward = -coverage - collisions as f32;
        let done = self.horizon.map_or(false, |h| self.steps >= h);
        if done {
            debug!(steps = self.steps, coverage, "navigation horizon reached");
        }

        let mut info = EnvInfo::new();
        info.insert("coverage".to_string(), coverage);
        info.insert("collisions".to_string(), collisions as f32);

        Ok(MultiStep {
            observations: self.observations(),
            rewards: vec![reward; self.n_agents],
            dones: vec![done; self.n_agents],
            info,
        })
    }
}
