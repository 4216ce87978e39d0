//! # Training Loop
//!
//! [`MarlTrainer`] alternates sampler ticks with learner updates. Each update
//! draws one batch per agent at shared row indices so centralized critics see
//! consistent joint actions, then optionally trains the communication graph
//! on the critics' mean Q value.

pub mod config;

use ndarray::{array, concatenate, Array2, ArrayView2, Axis};
use std::fs;
use std::path::PathBuf;
use tracing::{info, info_span, warn};

use crate::algorithms::{Learner, LearnerStats, TrainingBatch};
use crate::env::MultiAgentEnv;
use crate::error::{MarlError, Result};
use crate::logger::{TabularLogger, TracingLogger};
use crate::policy::Policy;
use crate::pool::{Batch, ReplayPool};
use crate::sampler::{GraphSampler, Sampler, SamplerAgent};

pub use config::{NoiseSchedule, TrainerConfig};

/// What a call to [`MarlTrainer::train`] did.
#[derive(Clone, Debug, Default)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub total_steps: usize,
    /// Joint updates performed, each covering every learner once
    pub train_steps: usize,
    pub episodes: usize,
    pub last_stats: Vec<LearnerStats>,
    pub last_graph_loss: Option<f32>,
    pub checkpoints: Vec<PathBuf>,
}

pub struct MarlTrainer {
    config: TrainerConfig,
    sampler: GraphSampler,
    learners: Vec<Box<dyn Learner>>,
    noise_capable: Vec<bool>,
    logger: Box<dyn TabularLogger>,
    iteration: usize,
}

/// Stack every array except `skip` side by side, in agent order.
fn others(arrays: &[Array2<f32>], skip: usize) -> Result<Array2<f32>> {
    let views: Vec<ArrayView2<f32>> = arrays
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != skip)
        .map(|(_, a)| a.view())
        .collect();
    if views.is_empty() {
        return Err(MarlError::TrainingError("joint training needs more than one agent".to_string()));
    }
    Ok(concatenate(Axis(1), &views)?)
}

impl MarlTrainer {
    /// Bind `sampler` to `env`, giving agent `i` a snapshot of `learners[i]`'s
    /// policy and `pools[i]`.
    pub fn new(
        config: TrainerConfig,
        mut sampler: GraphSampler,
        env: Box<dyn MultiAgentEnv>,
        mut learners: Vec<Box<dyn Learner>>,
        pools: Vec<ReplayPool>,
    ) -> Result<Self> {
        config.validate()?;
        MarlError::check_len("pool list", learners.len(), pools.len())?;

        let noise_capable: Vec<bool> = learners
            .iter_mut()
            .map(|learner| learner.policy_mut().noise_control().is_some())
            .collect();
        let initial_noise = config.noise.level(0, config.n_epochs);
        for learner in learners.iter_mut() {
            if let Some(control) = learner.policy_mut().noise_control() {
                control.set_noise_level(initial_noise);
            }
        }

        let mut agents = Vec::with_capacity(learners.len());
        for (i, (learner, pool)) in learners.iter_mut().zip(pools).enumerate() {
            if learner.kind().is_joint() && !pool.is_joint() {
                return Err(MarlError::invalid_parameter(
                    "pools".to_string(),
                    format!("agent {} trains a joint critic but its pool stores no opponent actions", i),
                ));
            }
            if config.train_graph && !pool.stores_graph() {
                return Err(MarlError::invalid_parameter(
                    "pools".to_string(),
                    format!("graph training needs communication snapshots in pool {}", i),
                ));
            }
            agents.push(SamplerAgent::new(learner.snapshot_policy(), pool));
        }
        sampler.initialize(env, agents)?;

        Ok(MarlTrainer {
            config,
            sampler,
            learners,
            noise_capable,
            logger: Box::new(TracingLogger::new()),
            iteration: 0,
        })
    }

    pub fn with_logger(mut self, logger: Box<dyn TabularLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn sampler(&self) -> &GraphSampler {
        &self.sampler
    }

    pub fn learners(&self) -> &[Box<dyn Learner>] {
        &self.learners
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn train(&mut self) -> Result<TrainingSummary> {
        let mut summary = TrainingSummary::default();
        info!(
            epochs = self.config.n_epochs,
            agents = self.learners.len(),
            "starting training"
        );

        for epoch in 0..self.config.n_epochs {
            let span = info_span!("epoch", epoch);
            let _enter = span.enter();
            let mut trained = false;

            for _ in 0..self.config.epoch_length {
                self.sampler.sample()?;
                summary.total_steps += 1;

                if epoch < self.config.exploration_epochs || !self.sampler.batch_ready() {
                    continue;
                }

                self.apply_noise(epoch);
                for _ in 0..self.config.n_train_repeat {
                    let (stats, graph_loss) = self.train_step(epoch)?;
                    summary.last_stats = stats;
                    if graph_loss.is_some() {
                        summary.last_graph_loss = graph_loss;
                    }
                    summary.train_steps += 1;
                    trained = true;
                }
                self.rebind_policies()?;
            }

            if trained {
                self.log_epoch(epoch, &summary);
            }
            if let Some(path) = self.checkpoint(epoch)? {
                summary.checkpoints.push(path);
            }
            summary.epochs += 1;
        }

        summary.episodes = self.sampler.state().episode_count;
        self.sampler.terminate()?;
        info!(
            steps = summary.total_steps,
            updates = summary.train_steps,
            episodes = summary.episodes,
            "training finished"
        );
        Ok(summary)
    }

    fn apply_noise(&mut self, epoch: usize) {
        let level = self.config.noise.level(epoch, self.config.n_epochs);
        for (learner, &capable) in self.learners.iter_mut().zip(&self.noise_capable) {
            if capable {
                if let Some(control) = learner.policy_mut().noise_control() {
                    control.set_noise_level(level);
                }
            }
        }
    }

    fn rebind_policies(&mut self) -> Result<()> {
        let policies = self
            .learners
            .iter_mut()
            .map(|learner| learner.snapshot_policy())
            .collect();
        self.sampler.set_policies(policies)
    }

    fn training_batches(&mut self) -> Result<Vec<TrainingBatch>> {
        let batches = self.sampler.random_joint_batch()?;
        let any_opponent_model = self.learners.iter().any(|l| l.kind().is_opponent_modelling());
        let recent: Option<Vec<Batch>> = if any_opponent_model {
            Some(self.sampler.recent_joint_batch()?)
        } else {
            None
        };

        let actions: Vec<Array2<f32>> = batches.iter().map(|b| b.actions.clone()).collect();
        let next_actions = self
            .learners
            .iter()
            .zip(&batches)
            .map(|(learner, batch)| learner.target_actions(batch.next_observations.view()))
            .collect::<Result<Vec<_>>>()?;

        let mut training = Vec::with_capacity(batches.len());
        for (i, batch) in batches.into_iter().enumerate() {
            let learner = &self.learners[i];
            let kind = learner.kind();
            let next_observations = batch.next_observations.clone();
            let mut tb = TrainingBatch::new(batch);

            if kind.is_joint() {
                let opponent_next = if kind.is_opponent_modelling() {
                    learner
                        .predict_opponent_actions(next_observations.view())?
                        .ok_or_else(|| MarlError::TrainingError(format!("agent {} has no opponent model", i)))?
                } else {
                    others(&next_actions, i)?
                };
                tb = tb
                    .with_opponent_actions(others(&actions, i)?)
                    .with_opponent_next_actions(opponent_next);
            }
            if kind.is_opponent_modelling() {
                if let Some(recent) = recent.as_ref() {
                    tb = tb.with_recent(recent[i].clone());
                }
            }
            training.push(tb);
        }
        Ok(training)
    }

    fn train_step(&mut self, epoch: usize) -> Result<(Vec<LearnerStats>, Option<f32>)> {
        let batches = self.training_batches()?;
        let mut stats = Vec::with_capacity(batches.len());
        let mut q_means = Vec::with_capacity(batches.len());

        for (learner, batch) in self.learners.iter_mut().zip(&batches) {
            stats.push(learner.train(self.iteration, batch)?);
            q_means.push(learner.q_mean(batch)?);
        }
        self.iteration += 1;

        let graph_loss = if self.config.train_graph && epoch < self.config.graph_train_epochs {
            Some(self.train_graph(&batches, &q_means)?)
        } else {
            None
        };
        Ok((stats, graph_loss))
    }

    fn train_graph(&mut self, batches: &[TrainingBatch], q_means: &[f32]) -> Result<f32> {
        let lead = batches
            .first()
            .ok_or_else(|| MarlError::TrainingError("no batches".to_string()))?;
        let (matrices, log_probs) = match (lead.batch.adjacency.as_ref(), lead.batch.log_adjacency.as_ref()) {
            (Some(m), Some(l)) => (m, l),
            _ => {
                return Err(MarlError::TrainingError(
                    "graph training needs stored communication snapshots".to_string(),
                ))
            }
        };

        let views: Vec<ArrayView2<f32>> = batches.iter().map(|b| b.batch.observations.view()).collect();
        let observations = concatenate(Axis(1), &views)?;
        let q_mean = q_means.iter().sum::<f32>() / q_means.len().max(1) as f32;

        self.sampler
            .graph_mut()
            .backward(observations.view(), array![q_mean].view(), matrices.view(), log_probs.view())
    }

    fn checkpoint(&self, epoch: usize) -> Result<Option<PathBuf>> {
        let dir = match self.config.checkpoint_dir.as_ref() {
            Some(dir) => dir,
            None => return Ok(None),
        };
        if epoch % self.config.save_interval != 0 {
            return Ok(None);
        }
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("graph_epoch_{}.bin", epoch));
        if let Err(err) = self.sampler.graph().save(&path) {
            warn!(path = %path.display(), %err, "graph checkpoint failed");
            return Err(err);
        }
        info!(path = %path.display(), "saved graph checkpoint");
        Ok(Some(path))
    }

    fn log_epoch(&mut self, epoch: usize, summary: &TrainingSummary) {
        self.logger.record("epoch", epoch as f32);
        self.logger.record("train-steps", summary.train_steps as f32);
        for (i, stats) in summary.last_stats.iter().enumerate() {
            self.logger.record(&format!("critic-loss_agent_{}", i), stats.critic_loss);
            self.logger.record(&format!("q-mean_agent_{}", i), stats.q_mean);
            if let Some(loss) = stats.actor_loss {
                self.logger.record(&format!("actor-loss_agent_{}", i), loss);
            }
            if let Some(loss) = stats.opponent_loss {
                self.logger.record(&format!("opponent-loss_agent_{}", i), loss);
            }
        }
        if let Some(loss) = summary.last_graph_loss {
            self.logger.record("graph-loss", loss);
        }
        self.sampler.log_diagnostics(&mut *self.logger);
        self.logger.dump();
    }
}
