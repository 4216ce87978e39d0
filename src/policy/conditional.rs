use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;

use super::{AgentInfo, GaussianNoise, NoiseControl, Policy, PolicyKind};
use crate::activations::Activation;
use crate::error::{MarlError, Result};
use crate::network::NeuralNetwork;

/// Opponent-modelling policy with k-level reasoning.
///
/// The actor is conditioned on a guess of the other agents' actions and the
/// opponent model is conditioned on the agent's own action. Starting from a
/// zero guess the two are iterated `k` times:
///
/// ```text
/// a0   = actor(obs | 0)
/// opp_l = opponent_model(obs | a_(l-1))
/// a_l   = actor(obs | opp_l)
/// ```
///
/// `get_action` returns `a_k` followed by `opp_k`, so its output is
/// `action_dim + opponent_action_dim` long.
#[derive(Clone, Debug)]
pub struct ConditionalPolicy {
    pub actor: NeuralNetwork,
    pub opponent_model: NeuralNetwork,
    observation_dim: usize,
    action_dim: usize,
    opponent_action_dim: usize,
    k: usize,
    noise: GaussianNoise,
}

impl ConditionalPolicy {
    #[allow(clippy::too_many_arguments)]
    pub fn new<R: Rng + ?Sized>(
        observation_dim: usize,
        action_dim: usize,
        opponent_action_dim: usize,
        hidden_sizes: &[usize],
        k: usize,
        noise_level: f32,
        noise_seed: u64,
        rng: &mut R,
    ) -> Result<Self> {
        if k == 0 {
            return Err(MarlError::invalid_parameter("k", "reasoning depth must be at least 1"));
        }
        let actor = NeuralNetwork::mlp(
            observation_dim + opponent_action_dim,
            hidden_sizes,
            action_dim,
            Activation::Tanh,
            rng,
        )?;
        let opponent_model = NeuralNetwork::mlp(
            observation_dim + action_dim,
            hidden_sizes,
            opponent_action_dim,
            Activation::Tanh,
            rng,
        )?;
        Ok(ConditionalPolicy {
            actor,
            opponent_model,
            observation_dim,
            action_dim,
            opponent_action_dim,
            k,
            noise: GaussianNoise::new(noise_level, noise_seed),
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn opponent_action_dim(&self) -> usize {
        self.opponent_action_dim
    }

    pub fn actor_input(&self, observations: ArrayView2<f32>, opponent_actions: ArrayView2<f32>) -> Result<Array2<f32>> {
        MarlError::check_len("opponent actions", self.opponent_action_dim, opponent_actions.ncols())?;
        Ok(concatenate(Axis(1), &[observations.view(), opponent_actions.view()])?)
    }

    pub fn opponent_input(&self, observations: ArrayView2<f32>, actions: ArrayView2<f32>) -> Result<Array2<f32>> {
        MarlError::check_len("own actions", self.action_dim, actions.ncols())?;
        Ok(concatenate(Axis(1), &[observations.view(), actions.view()])?)
    }

    /// Opponent model prediction given the agent's own actions.
    pub fn predict_opponents(&self, observations: ArrayView2<f32>, actions: ArrayView2<f32>) -> Result<Array2<f32>> {
        let input = self.opponent_input(observations, actions)?;
        self.opponent_model.predict_batch(input.view())
    }

    /// Noise-free ladder. Returns `a_0..=a_k` and the final opponent guess `opp_k`.
    pub fn ladder(&self, observations: ArrayView2<f32>) -> Result<(Vec<Array2<f32>>, Array2<f32>)> {
        MarlError::check_len("observation", self.observation_dim, observations.ncols())?;
        let batch = observations.nrows();

        let zeros = Array2::zeros((batch, self.opponent_action_dim));
        let mut actions = self.actor.predict_batch(self.actor_input(observations, zeros.view())?.view())?;
        let mut levels = Vec::with_capacity(self.k + 1);
        let mut opponents = zeros;
        levels.push(actions.clone());

        for _ in 0..self.k {
            opponents = self.predict_opponents(observations, actions.view())?;
            actions = self.actor.predict_batch(self.actor_input(observations, opponents.view())?.view())?;
            levels.push(actions.clone());
        }

        Ok((levels, opponents))
    }

    /// Noise-free `(a_k, opp_k)` for a batch.
    pub fn act(&self, observations: ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        let (mut levels, opponents) = self.ladder(observations)?;
        let actions = levels
            .pop()
            .ok_or_else(|| MarlError::Policy("empty reasoning ladder".to_string()))?;
        Ok((actions, opponents))
    }
}

impl Policy for ConditionalPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::OpponentModelling
    }

    fn observation_dim(&self) -> usize {
        self.observation_dim
    }

    fn action_dim(&self) -> usize {
        self.action_dim
    }

    fn output_dim(&self) -> usize {
        self.action_dim + self.opponent_action_dim
    }

    fn get_action(&mut self, observation: ArrayView1<f32>) -> Result<(Array1<f32>, AgentInfo)> {
        let actions = self.get_actions(observation.insert_axis(Axis(0)))?;
        Ok((actions.row(0).to_owned(), AgentInfo::new()))
    }

    fn get_actions(&mut self, observations: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (mut actions, opponents) = self.act(observations)?;
        for mut row in actions.rows_mut() {
            let mut action = row.to_owned();
            self.noise.perturb(&mut action);
            row.assign(&action);
        }
        Ok(concatenate(Axis(1), &[actions.view(), opponents.view()])?)
    }

    fn get_all_actions(&mut self, observation: ArrayView1<f32>) -> Result<Vec<Array1<f32>>> {
        let (levels, _) = self.ladder(observation.insert_axis(Axis(0)))?;
        Ok(levels.into_iter().map(|level| level.row(0).to_owned()).collect())
    }

    fn reseed(&mut self, seed: u64) {
        self.noise.reseed(seed);
    }

    fn noise_control(&mut self) -> Option<&mut dyn NoiseControl> {
        Some(self)
    }
}

impl NoiseControl for ConditionalPolicy {
    fn noise_level(&self) -> f32 {
        self.noise.level()
    }

    fn set_noise_level(&mut self, level: f32) {
        self.noise.set_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, s};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy(k: usize) -> ConditionalPolicy {
        let mut rng = StdRng::seed_from_u64(21);
        ConditionalPolicy::new(3, 2, 4, &[8], k, 0.0, 0, &mut rng).unwrap()
    }

    #[test]
    fn test_output_layout() {
        let mut p = policy(1);
        assert_eq!(p.output_dim(), 6);
        let (out, _) = p.get_action(array![0.2, 0.1, -0.4].view()).unwrap();
        assert_eq!(out.len(), 6);

        let (a, opp) = p.act(array![[0.2, 0.1, -0.4]].view()).unwrap();
        assert_eq!(out.slice(s![..2]), a.row(0));
        assert_eq!(out.slice(s![2..]), opp.row(0));
    }

    #[test]
    fn test_ladder_follows_recurrence() {
        let p = policy(2);
        let obs = array![[0.5, -0.5, 0.25]];
        let (levels, opp) = p.ladder(obs.view()).unwrap();
        assert_eq!(levels.len(), 3);

        let zeros = Array2::zeros((1, 4));
        let a0 = p.actor.predict_batch(p.actor_input(obs.view(), zeros.view()).unwrap().view()).unwrap();
        assert_eq!(levels[0], a0);

        let opp1 = p.predict_opponents(obs.view(), a0.view()).unwrap();
        let a1 = p.actor.predict_batch(p.actor_input(obs.view(), opp1.view()).unwrap().view()).unwrap();
        assert_eq!(levels[1], a1);

        let opp2 = p.predict_opponents(obs.view(), a1.view()).unwrap();
        assert_eq!(opp, opp2);
    }

    #[test]
    fn test_get_all_actions_returns_every_level() {
        let mut p = policy(3);
        let all = p.get_all_actions(array![0.0, 0.1, 0.2].view()).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|a| a.len() == 2));
    }

    #[test]
    fn test_zero_depth_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(ConditionalPolicy::new(3, 2, 4, &[], 0, 0.0, 0, &mut rng).is_err());
    }
}
