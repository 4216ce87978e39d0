//! # Samplers
//!
//! Samplers own the interaction loop: each `sample()` call performs exactly one
//! environment step and writes the resulting transitions into the replay pools.
//! The training loop is the only reader of those pools and never interleaves
//! with a tick.
//!
//! - [`SimpleSampler`]: one agent, one pool
//! - [`GraphSampler`]: several agents talking through a [`CommunicationGraph`](crate::graph::CommunicationGraph)
//! - [`DummySampler`]: does nothing, always ready
//!
//! [`rollout`] runs whole episodes instead of single ticks.

pub mod dummy;
pub mod graph;
pub mod rollout;
pub mod simple;

use serde::{Serialize, Deserialize};

use crate::error::{MarlError, Result};
use crate::logger::TabularLogger;
use crate::pool::Batch;

pub use dummy::DummySampler;
pub use graph::{GraphSampler, GraphSamplerState, MessageCache, SamplerAgent};
pub use rollout::{rollout, rollouts, Path};
pub use simple::{SimpleSampler, SimpleSamplerState};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SamplerConfig {
    /// Episodes are cut after this many steps
    pub max_path_length: usize,
    /// Pools must hold this many transitions before `batch_ready`
    pub min_pool_size: usize,
    pub batch_size: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            max_path_length: 30,
            min_pool_size: 100,
            batch_size: 64,
        }
    }
}

impl SamplerConfig {
    pub fn new(max_path_length: usize, min_pool_size: usize, batch_size: usize) -> Self {
        SamplerConfig {
            max_path_length,
            min_pool_size,
            batch_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_path_length == 0 {
            return Err(MarlError::invalid_parameter("max_path_length", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(MarlError::invalid_parameter("batch_size", "must be positive"));
        }
        Ok(())
    }
}

pub trait Sampler {
    /// One tick of interaction.
    fn sample(&mut self) -> Result<()>;

    /// True once every bound pool holds at least `min_pool_size` transitions.
    fn batch_ready(&self) -> bool;

    /// `batch_size` uniformly drawn transitions from `agent`'s pool.
    fn random_batch(&mut self, agent: usize) -> Result<Batch>;

    /// Release the environment. Safe to call when nothing is bound.
    fn terminate(&mut self) -> Result<()>;

    fn log_diagnostics(&self, logger: &mut dyn TabularLogger);
}

/// The closed set of samplers.
pub enum SamplerVariant {
    Simple(SimpleSampler),
    Graph(GraphSampler),
    Dummy(DummySampler),
}

impl From<SimpleSampler> for SamplerVariant {
    fn from(sampler: SimpleSampler) -> Self {
        SamplerVariant::Simple(sampler)
    }
}

impl From<GraphSampler> for SamplerVariant {
    fn from(sampler: GraphSampler) -> Self {
        SamplerVariant::Graph(sampler)
    }
}

impl From<DummySampler> for SamplerVariant {
    fn from(sampler: DummySampler) -> Self {
        SamplerVariant::Dummy(sampler)
    }
}

impl Sampler for SamplerVariant {
    fn sample(&mut self) -> Result<()> {
        match self {
            SamplerVariant::Simple(s) => s.sample(),
            SamplerVariant::Graph(s) => s.sample(),
            SamplerVariant::Dummy(s) => s.sample(),
        }
    }

    fn batch_ready(&self) -> bool {
        match self {
            SamplerVariant::Simple(s) => s.batch_ready(),
            SamplerVariant::Graph(s) => s.batch_ready(),
            SamplerVariant::Dummy(s) => s.batch_ready(),
        }
    }

    fn random_batch(&mut self, agent: usize) -> Result<Batch> {
        match self {
            SamplerVariant::Simple(s) => s.random_batch(agent),
            SamplerVariant::Graph(s) => s.random_batch(agent),
            SamplerVariant::Dummy(s) => s.random_batch(agent),
        }
    }

    fn terminate(&mut self) -> Result<()> {
        match self {
            SamplerVariant::Simple(s) => s.terminate(),
            SamplerVariant::Graph(s) => s.terminate(),
            SamplerVariant::Dummy(s) => s.terminate(),
        }
    }

    fn log_diagnostics(&self, logger: &mut dyn TabularLogger) {
        match self {
            SamplerVariant::Simple(s) => s.log_diagnostics(logger),
            SamplerVariant::Graph(s) => s.log_diagnostics(logger),
            SamplerVariant::Dummy(s) => s.log_diagnostics(logger),
        }
    }
}
