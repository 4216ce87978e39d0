//! # Activation Functions
//!
//! The handful of element-wise non-linearities used by the actor, critic and
//! communication-graph networks.
//!
//! - **ReLU**: hidden layers
//! - **Tanh**: bounded continuous actions in `[-1, 1]`
//! - **Sigmoid**: edge probabilities of the communication graph
//! - **Linear**: critic heads and raw logits

pub mod functions;

pub use functions::{sigmoid, Activation};
