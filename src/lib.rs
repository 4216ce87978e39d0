//! # graphmarl - Multi-Agent Reinforcement Learning with Learned Communication
//!
//! graphmarl trains cooperating agents that exchange information through a
//! communication graph. Every environment tick the agents' observations are
//! concatenated, a graph model samples a row-normalised communication matrix
//! `A`, and each agent acts on its message row of `A x observations` instead of
//! its raw observation. Transitions land in per-agent replay pools together
//! with the matrix and its log-probabilities, so the graph model can later be
//! trained with REINFORCE on the critics' Q values.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graphmarl::env::CooperativeNavigation;
//! use graphmarl::graph::FixedGraph;
//! use graphmarl::policy::UniformPolicy;
//! use graphmarl::pool::{PoolSpec, ReplayPool};
//! use graphmarl::sampler::{GraphSampler, Sampler, SamplerAgent, SamplerConfig};
//!
//! let env = CooperativeNavigation::new(2, 0);
//! let graph = FixedGraph::uniform(2, 2 * 6).unwrap();
//! let mut sampler = GraphSampler::new(SamplerConfig::new(25, 10, 8), Box::new(graph)).unwrap();
//!
//! let agents = (0..2)
//!     .map(|i| {
//!         let pool = ReplayPool::new(PoolSpec::new(1000, 6, 2).with_graph(2), i).unwrap();
//!         SamplerAgent::new(UniformPolicy::new(6, 2, i).into(), pool)
//!     })
//!     .collect();
//! sampler.initialize(Box::new(env), agents).unwrap();
//!
//! for _ in 0..100 {
//!     sampler.sample().unwrap();
//! }
//! let batches = sampler.random_joint_batch().unwrap();
//! assert_eq!(batches[0].indices, batches[1].indices);
//! ```
//!
//! ## Module Organization
//!
//! - [`env`] - Single- and multi-agent environment interfaces, plus a cooperative navigation task
//! - [`graph`] - Communication graph models and message computation
//! - [`policy`] - Acting policies (deterministic, k-level conditional, uniform)
//! - [`pool`] - Fixed-capacity replay pools with optional opponent and graph fields
//! - [`sampler`] - Samplers driving the interaction loop, and episode rollouts
//! - [`algorithms`] - DDPG-family learners with independent, joint or opponent-modelling critics
//! - [`trainer`] - The epoch loop tying sampler, learners and graph training together
//! - [`logger`] - Tabular diagnostics sinks
//! - [`network`] - Dense networks used by policies, critics and graph models
//! - [`optimizer`] - SGD, Adam and gradient clipping
//! - [`activations`] - Activation functions
//! - [`error`] - Error types and result handling

pub mod activations;
pub mod algorithms;
pub mod env;
pub mod error;
pub mod graph;
pub mod logger;
pub mod network;
pub mod optimizer;
pub mod policy;
pub mod pool;
pub mod sampler;
pub mod trainer;

pub use error::{MarlError, Result};

#[cfg(test)]
mod tests;
