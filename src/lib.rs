//! Actor-critic training with a non-differentiable, annealing-sampled critic.
//!
//! The critic is any [`Critic`]: it scores (state, action) pairs and learns
//! through its own weight-update rule. The actor is a differentiable
//! [`Actor`] trained on a gradient that [`GradientBridge`] estimates by
//! finite-difference probing of the critic. Target copies of both follow the
//! live networks through Polyak averaging.

pub mod actor;
pub mod agent;
pub mod bridge;
pub mod config;
pub mod critic;
pub mod device;
pub mod env;
pub mod error;
pub mod experience;
pub mod metrics;
pub mod mlp;
pub mod polyak;
pub mod steering;

pub use actor::{Actor, MlpActor};
pub use agent::{ActorCriticAgent, AgentCheckpoint};
pub use bridge::{BridgedObjective, GradientBridge, GradientConfig, GradientMethod};
pub use config::{AgentConfig, RolloutConfig, RunConfig};
pub use critic::{BoltzmannConfig, BoltzmannCritic, Critic, CriticWeights};
pub use env::{BoxSpace, Environment, Step};
pub use error::{AgentError, Result};
pub use experience::{Batch, ReplayBuffer, Transition};
pub use metrics::{TrainStats, TrainingLog};
