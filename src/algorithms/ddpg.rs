use ndarray::{concatenate, s, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Serialize, Deserialize};
use tracing::trace;

use super::{Learner, LearnerStats, TrainingBatch};
use crate::activations::Activation;
use crate::error::{MarlError, Result};
use crate::network::NeuralNetwork;
use crate::optimizer::{GradientClipper, OptimizerWrapper};
use crate::policy::{Policy, PolicyKind, PolicyVariant};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DdpgConfig {
    pub gamma: f32,
    /// Soft target update rate
    pub tau: f32,
    pub actor_lr: f32,
    pub critic_lr: f32,
    pub opponent_lr: f32,
    pub critic_hidden: Vec<usize>,
    /// Update the actor every `policy_delay` iterations
    pub policy_delay: usize,
    pub clipper: GradientClipper,
}

impl Default for DdpgConfig {
    fn default() -> Self {
        DdpgConfig {
            gamma: 0.95,
            tau: 0.01,
            actor_lr: 1e-3,
            critic_lr: 1e-3,
            opponent_lr: 1e-3,
            critic_hidden: vec![64, 64],
            policy_delay: 1,
            clipper: GradientClipper::ByGlobalNorm { max_norm: 0.5 },
        }
    }
}

impl DdpgConfig {
    pub fn gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn tau(mut self, tau: f32) -> Self {
        self.tau = tau;
        self
    }

    pub fn learning_rates(mut self, actor: f32, critic: f32, opponent: f32) -> Self {
        self.actor_lr = actor;
        self.critic_lr = critic;
        self.opponent_lr = opponent;
        self
    }

    pub fn critic_hidden(mut self, hidden: Vec<usize>) -> Self {
        self.critic_hidden = hidden;
        self
    }

    pub fn policy_delay(mut self, delay: usize) -> Self {
        self.policy_delay = delay;
        self
    }

    pub fn clipper(mut self, clipper: GradientClipper) -> Self {
        self.clipper = clipper;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(MarlError::invalid_parameter("gamma", "must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.tau) {
            return Err(MarlError::invalid_parameter("tau", "must be in [0, 1]"));
        }
        if self.actor_lr <= 0.0 || self.critic_lr <= 0.0 || self.opponent_lr <= 0.0 {
            return Err(MarlError::invalid_parameter("learning rate", "must be positive"));
        }
        if self.policy_delay == 0 {
            return Err(MarlError::invalid_parameter("policy_delay", "must be positive"));
        }
        Ok(())
    }
}

/// Deterministic policy-gradient learner for every [`PolicyKind`].
///
/// The critic sees the agent's observation and action, and for joint kinds the
/// other agents' actions as well. Targets use Polyak-averaged copies of the
/// critic and the policy.
#[derive(Clone, Debug)]
pub struct DdpgLearner {
    config: DdpgConfig,
    kind: PolicyKind,
    policy: PolicyVariant,
    target_policy: PolicyVariant,
    critic: NeuralNetwork,
    target_critic: NeuralNetwork,
    critic_optimizer: OptimizerWrapper,
    actor_optimizer: OptimizerWrapper,
    opponent_optimizer: OptimizerWrapper,
    observation_dim: usize,
    action_dim: usize,
    opponent_action_dim: usize,
    snapshot_rng: StdRng,
}

fn actor_network(policy: &mut PolicyVariant) -> Result<&mut NeuralNetwork> {
    match policy {
        PolicyVariant::Deterministic(p) => Ok(&mut p.actor),
        PolicyVariant::Conditional(p) => Ok(&mut p.actor),
        PolicyVariant::Uniform(_) => Err(MarlError::Policy("uniform policies cannot be trained".to_string())),
    }
}

impl DdpgLearner {
    /// `opponent_action_dim` is the summed action size of every other agent;
    /// ignored for independent policies.
    pub fn new(config: DdpgConfig, policy: PolicyVariant, opponent_action_dim: usize, seed: u64) -> Result<Self> {
        config.validate()?;
        let kind = policy.kind();
        match &policy {
            PolicyVariant::Uniform(_) => {
                return Err(MarlError::invalid_parameter("policy", "uniform policies cannot be trained"))
            }
            PolicyVariant::Conditional(p) => {
                MarlError::check_len("opponent model output", opponent_action_dim, p.opponent_action_dim())?
            }
            PolicyVariant::Deterministic(_) => {}
        }
        if kind.is_joint() && opponent_action_dim == 0 {
            return Err(MarlError::invalid_parameter(
                "opponent_action_dim",
                "joint learners need other agents",
            ));
        }

        let observation_dim = policy.observation_dim();
        let action_dim = policy.action_dim();
        let opponent_action_dim = if kind.is_joint() { opponent_action_dim } else { 0 };

        let mut rng = StdRng::seed_from_u64(seed);
        let critic = NeuralNetwork::mlp(
            observation_dim + action_dim + opponent_action_dim,
            &config.critic_hidden,
            1,
            Activation::Linear,
            &mut rng,
        )?;

        Ok(DdpgLearner {
            target_policy: policy.clone(),
            target_critic: critic.clone(),
            critic,
            policy,
            kind,
            critic_optimizer: OptimizerWrapper::adam(),
            actor_optimizer: OptimizerWrapper::adam(),
            opponent_optimizer: OptimizerWrapper::adam(),
            observation_dim,
            action_dim,
            opponent_action_dim,
            snapshot_rng: rng,
            config,
        })
    }

    pub fn config(&self) -> &DdpgConfig {
        &self.config
    }

    pub fn critic(&self) -> &NeuralNetwork {
        &self.critic
    }

    fn critic_input(
        &self,
        observations: ArrayView2<f32>,
        actions: ArrayView2<f32>,
        opponent_actions: Option<ArrayView2<f32>>,
    ) -> Result<Array2<f32>> {
        MarlError::check_len("critic observation", self.observation_dim, observations.ncols())?;
        MarlError::check_len("critic action", self.action_dim, actions.ncols())?;
        if !self.kind.is_joint() {
            return Ok(concatenate(Axis(1), &[observations.view(), actions.view()])?);
        }
        let opponents = opponent_actions
            .ok_or_else(|| MarlError::TrainingError("joint critic needs opponent actions".to_string()))?;
        MarlError::check_len("critic opponent action", self.opponent_action_dim, opponents.ncols())?;
        Ok(concatenate(Axis(1), &[observations.view(), actions.view(), opponents.view()])?)
    }

    fn stored_opponent_actions<'a>(&self, batch: &'a TrainingBatch) -> Option<ArrayView2<'a, f32>> {
        batch
            .opponent_actions
            .as_ref()
            .or(batch.batch.opponent_actions.as_ref())
            .map(|a| a.view())
    }

    fn update_critic(&mut self, batch: &TrainingBatch) -> Result<(f32, f32)> {
        let rows = &batch.batch;
        let n = rows.len() as f32;

        let next_actions = self.target_actions(rows.next_observations.view())?;
        let next_opponents = batch.opponent_next_actions.as_ref().map(|a| a.view());
        let target_input = self.critic_input(rows.next_observations.view(), next_actions.view(), next_opponents)?;
        let next_q = self.target_critic.predict_batch(target_input.view())?.column(0).to_owned();
        let not_done = rows.terminals.mapv(|d| if d { 0.0 } else { 1.0 });
        let targets = &rows.rewards + &(next_q * &not_done * self.config.gamma);

        let input = self.critic_input(
            rows.observations.view(),
            rows.actions.view(),
            self.stored_opponent_actions(batch),
        )?;
        let q = self.critic.forward_batch(input.view())?;
        let q_mean = q.mean().unwrap_or(0.0);
        let diff = &q.column(0) - &targets;
        let loss = diff.mapv(|d| d * d).mean().unwrap_or(0.0);
        if !loss.is_finite() {
            return Err(MarlError::NumericalError(format!("critic loss is {}", loss)));
        }

        let errors = (diff * (2.0 / n)).insert_axis(Axis(1));
        let (mut gradients, _) = self.critic.backward_batch(errors.view())?;
        self.config.clipper.clip(&mut gradients);
        self.critic
            .apply_gradients(&gradients, &mut self.critic_optimizer, self.config.critic_lr)?;
        Ok((loss, q_mean))
    }

    fn update_actor(&mut self, batch: &TrainingBatch) -> Result<f32> {
        let observations = batch.batch.observations.view();
        let n = batch.batch.len() as f32;

        // Opponent modelling conditions both actor and critic on the model's guess.
        let (actor_input, opponents) = match &self.policy {
            PolicyVariant::Deterministic(_) => (
                observations.to_owned(),
                self.stored_opponent_actions(batch).map(|a| a.to_owned()),
            ),
            PolicyVariant::Conditional(p) => {
                let (_, guess) = p.act(observations)?;
                (p.actor_input(observations, guess.view())?, Some(guess))
            }
            PolicyVariant::Uniform(_) => {
                return Err(MarlError::Policy("uniform policies cannot be trained".to_string()))
            }
        };

        let actions = actor_network(&mut self.policy)?.forward_batch(actor_input.view())?;
        let input = self.critic_input(observations, actions.view(), opponents.as_ref().map(|a| a.view()))?;
        let q = self.critic.forward_batch(input.view())?;
        let loss = -q.mean().unwrap_or(0.0);

        // d(-mean Q)/dQ, pushed back to the action columns of the critic input
        let output_errors = Array2::from_elem((q.nrows(), 1), -1.0 / n);
        let (_, input_gradients) = self.critic.backward_batch(output_errors.view())?;
        let action_gradients = input_gradients
            .slice(s![.., self.observation_dim..self.observation_dim + self.action_dim])
            .to_owned();

        let actor = actor_network(&mut self.policy)?;
        let (mut gradients, _) = actor.backward_batch(action_gradients.view())?;
        self.config.clipper.clip(&mut gradients);
        actor.apply_gradients(&gradients, &mut self.actor_optimizer, self.config.actor_lr)?;
        Ok(loss)
    }

    fn update_opponent_model(&mut self, batch: &TrainingBatch) -> Result<Option<f32>> {
        let policy = match &mut self.policy {
            PolicyVariant::Conditional(p) => p,
            _ => return Ok(None),
        };
        let recent = match batch.recent.as_ref() {
            Some(recent) if !recent.is_empty() => recent,
            _ => return Ok(None),
        };
        let targets = recent
            .opponent_actions
            .as_ref()
            .ok_or_else(|| MarlError::TrainingError("opponent model needs stored opponent actions".to_string()))?;

        let input = policy.opponent_input(recent.observations.view(), recent.actions.view())?;
        let predictions = policy.opponent_model.forward_batch(input.view())?;
        let diff = &predictions - targets;
        let loss = diff.mapv(|d| d * d).mean().unwrap_or(0.0);

        let errors = diff * (2.0 / predictions.len().max(1) as f32);
        let (mut gradients, _) = policy.opponent_model.backward_batch(errors.view())?;
        self.config.clipper.clip(&mut gradients);
        policy
            .opponent_model
            .apply_gradients(&gradients, &mut self.opponent_optimizer, self.config.opponent_lr)?;
        Ok(Some(loss))
    }

    fn update_targets(&mut self) {
        let tau = self.config.tau;
        self.target_critic.soft_update_from(&self.critic, tau);
        match (&mut self.target_policy, &self.policy) {
            (PolicyVariant::Deterministic(target), PolicyVariant::Deterministic(source)) => {
                target.actor.soft_update_from(&source.actor, tau);
            }
            (PolicyVariant::Conditional(target), PolicyVariant::Conditional(source)) => {
                target.actor.soft_update_from(&source.actor, tau);
                target.opponent_model.soft_update_from(&source.opponent_model, tau);
            }
            _ => {}
        }
    }
}

impl Learner for DdpgLearner {
    fn kind(&self) -> PolicyKind {
        self.kind
    }

    fn policy(&self) -> &PolicyVariant {
        &self.policy
    }

    fn policy_mut(&mut self) -> &mut PolicyVariant {
        &mut self.policy
    }

    fn snapshot_policy(&mut self) -> PolicyVariant {
        let mut snapshot = self.policy.clone();
        snapshot.reseed(self.snapshot_rng.gen());
        snapshot
    }

    fn target_actions(&self, next_observations: ArrayView2<f32>) -> Result<Array2<f32>> {
        match &self.target_policy {
            PolicyVariant::Deterministic(p) => p.act(next_observations),
            PolicyVariant::Conditional(p) => Ok(p.act(next_observations)?.0),
            PolicyVariant::Uniform(_) => Err(MarlError::Policy("uniform policies have no target".to_string())),
        }
    }

    fn predict_opponent_actions(&self, observations: ArrayView2<f32>) -> Result<Option<Array2<f32>>> {
        match &self.target_policy {
            PolicyVariant::Conditional(p) => Ok(Some(p.act(observations)?.1)),
            _ => Ok(None),
        }
    }

    fn train(&mut self, iteration: usize, batch: &TrainingBatch) -> Result<LearnerStats> {
        if batch.batch.is_empty() {
            return Err(MarlError::EmptyBuffer("cannot train on an empty batch".to_string()));
        }

        let (critic_loss, q_mean) = self.update_critic(batch)?;
        let opponent_loss = self.update_opponent_model(batch)?;
        let actor_loss = if iteration % self.config.policy_delay == 0 {
            let loss = self.update_actor(batch)?;
            self.update_targets();
            Some(loss)
        } else {
            None
        };

        trace!(iteration, critic_loss, ?actor_loss, ?opponent_loss, "learner update");
        Ok(LearnerStats {
            critic_loss,
            actor_loss,
            opponent_loss,
            q_mean,
        })
    }

    fn q_values(&self, batch: &TrainingBatch) -> Result<Array1<f32>> {
        let rows = &batch.batch;
        let input = self.critic_input(
            rows.observations.view(),
            rows.actions.view(),
            self.stored_opponent_actions(batch),
        )?;
        Ok(self.critic.predict_batch(input.view())?.column(0).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ConditionalPolicy, DeterministicPolicy, UniformPolicy};
    use crate::pool::{PoolSpec, ReplayPool, Transition};
    use ndarray::array;

    fn deterministic(kind: PolicyKind) -> PolicyVariant {
        let mut rng = StdRng::seed_from_u64(1);
        DeterministicPolicy::new(2, 1, &[16], kind, 0.0, 0, &mut rng).unwrap().into()
    }

    /// Reward is higher the closer the action is to +0.5, episodes last one step.
    fn bandit_pool(joint: bool) -> ReplayPool {
        let mut spec = PoolSpec::new(256, 2, 1);
        if joint {
            spec = spec.with_opponent_actions(1);
        }
        let mut pool = ReplayPool::new(spec, 0).unwrap();
        for i in 0..200 {
            let a = (i as f32 / 100.0) - 1.0;
            let mut t = Transition::new(array![0.1, -0.1], array![a], -(a - 0.5).powi(2), true, array![0.1, -0.1]);
            if joint {
                t = t.with_opponent_action(array![0.0]);
            }
            pool.add_sample(&t).unwrap();
        }
        pool
    }

    #[test]
    fn test_rejects_untrainable_policies() {
        let uniform: PolicyVariant = UniformPolicy::new(2, 1, 0).into();
        assert!(DdpgLearner::new(DdpgConfig::default(), uniform, 0, 0).is_err());
        assert!(DdpgLearner::new(DdpgConfig::default(), deterministic(PolicyKind::Joint), 0, 0).is_err());
        assert!(DdpgConfig::default().gamma(1.5).validate().is_err());
    }

    #[test]
    fn test_critic_fits_rewards() {
        let mut learner = DdpgLearner::new(
            DdpgConfig::default().learning_rates(1e-3, 1e-2, 1e-3),
            deterministic(PolicyKind::Independent),
            0,
            3,
        )
        .unwrap();
        let mut pool = bandit_pool(false);

        let first = learner.train(0, &TrainingBatch::new(pool.random_batch(64).unwrap())).unwrap();
        let mut last = first.clone();
        for i in 1..300 {
            last = learner.train(i, &TrainingBatch::new(pool.random_batch(64).unwrap())).unwrap();
        }
        assert!(last.critic_loss < first.critic_loss);
        assert!(last.actor_loss.is_some());
    }

    #[test]
    fn test_policy_delay_skips_actor() {
        let mut learner = DdpgLearner::new(
            DdpgConfig::default().policy_delay(2),
            deterministic(PolicyKind::Independent),
            0,
            0,
        )
        .unwrap();
        let mut pool = bandit_pool(false);
        let batch = TrainingBatch::new(pool.random_batch(8).unwrap());
        assert!(learner.train(0, &batch).unwrap().actor_loss.is_some());
        assert!(learner.train(1, &batch).unwrap().actor_loss.is_none());
    }

    #[test]
    fn test_joint_critic_requires_next_opponent_actions() {
        let mut learner =
            DdpgLearner::new(DdpgConfig::default(), deterministic(PolicyKind::Joint), 1, 0).unwrap();
        let mut pool = bandit_pool(true);
        let rows = pool.random_batch(8).unwrap();

        assert!(learner.train(0, &TrainingBatch::new(rows.clone())).is_err());

        let batch = TrainingBatch::new(rows).with_opponent_next_actions(Array2::zeros((8, 1)));
        let stats = learner.train(0, &batch).unwrap();
        assert!(stats.critic_loss.is_finite());
        assert_eq!(learner.q_values(&batch).unwrap().len(), 8);
    }

    #[test]
    fn test_opponent_model_learns_recent_actions() {
        let mut rng = StdRng::seed_from_u64(2);
        let policy: PolicyVariant = ConditionalPolicy::new(2, 1, 1, &[16], 1, 0.0, 0, &mut rng).unwrap().into();
        let mut learner = DdpgLearner::new(
            DdpgConfig::default().learning_rates(1e-3, 1e-3, 1e-2),
            policy,
            1,
            0,
        )
        .unwrap();
        assert!(learner.predict_opponent_actions(Array2::zeros((3, 2)).view()).unwrap().is_some());

        let mut pool = ReplayPool::new(PoolSpec::new(64, 2, 1).with_opponent_actions(1), 0).unwrap();
        for i in 0..32 {
            let a = (i as f32 / 16.0) - 1.0;
            let t = Transition::new(array![0.3, 0.3], array![a], 0.0, true, array![0.3, 0.3])
                .with_opponent_action(array![0.4]);
            pool.add_sample(&t).unwrap();
        }
        let recent = pool.random_batch_by_indices(&pool.recent_indices(32)).unwrap();

        let mut losses = Vec::new();
        for i in 0..200 {
            let rows = pool.random_batch(16).unwrap();
            let batch = TrainingBatch::new(rows)
                .with_opponent_next_actions(Array2::zeros((16, 1)))
                .with_recent(recent.clone());
            losses.push(learner.train(i, &batch).unwrap().opponent_loss.unwrap());
        }
        assert!(losses[199] < losses[0]);
    }

    #[test]
    fn test_snapshots_are_reseeded() {
        let mut rng = StdRng::seed_from_u64(1);
        let policy: PolicyVariant =
            DeterministicPolicy::new(2, 1, &[4], PolicyKind::Independent, 0.5, 0, &mut rng).unwrap().into();
        let mut learner = DdpgLearner::new(DdpgConfig::default(), policy, 0, 0).unwrap();
        let mut a = learner.snapshot_policy();
        let mut b = learner.snapshot_policy();
        let obs = array![0.0, 0.0];
        assert_ne!(a.get_action(obs.view()).unwrap().0, b.get_action(obs.view()).unwrap().0);
    }
}
