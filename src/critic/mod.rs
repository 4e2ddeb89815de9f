//! Value-estimator capability consumed by the actor-critic trainer.
//!
//! The trainer never looks inside a critic: it evaluates single samples to
//! obtain an opaque internal representation, hands that representation back
//! to the critic's own learning rule, probes batched values for the gradient
//! bridge, and blends the coupling weights of the live and target copies.

pub mod boltzmann;
mod weights;

use candle_core::Tensor;

pub use boltzmann::{BoltzmannConfig, BoltzmannCritic, SpinSample};
pub use weights::{CouplingLayout, CriticWeights};

use crate::error::Result;

/// Value of one (state, action) pair together with whatever the critic needs
/// to apply its learning rule to that sample later.
#[derive(Debug, Clone)]
pub struct Evaluation<S> {
    pub q_value: f32,
    pub sample: S,
}

/// Quantity a set of analytic derivatives refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Differentiated {
    /// Derivatives of `Q` itself.
    Value,
    /// Derivatives of a free energy `F` with `Q = -F`.
    FreeEnergy,
}

/// Closed-form derivatives offered by critics that can compute them.
///
/// `d_states` is `[batch, state_dim]`, `d_actions` is `[batch, action_dim]`.
#[derive(Debug, Clone)]
pub struct AnalyticGradients {
    pub q_values: Tensor,
    pub d_states: Tensor,
    pub d_actions: Tensor,
    pub wrt: Differentiated,
}

pub trait Critic {
    /// Per-sample payload required by [`Critic::update_weights`].
    type Sample;

    /// Single-sample evaluation returning the value and the internal sample.
    fn evaluate(&mut self, state: &[f32], action: &[f32]) -> Result<Evaluation<Self::Sample>>;

    /// Values for a `[batch, state_dim]` / `[batch, action_dim]` pair, shape `[batch]`.
    fn evaluate_batch(&mut self, states: &Tensor, actions: &Tensor) -> Result<Tensor>;

    /// Applies the critic's own learning rule in place for one sample.
    fn update_weights(
        &mut self,
        sample: &Self::Sample,
        q_value: f32,
        next_q_value: f32,
        reward: f32,
        learning_rate: f32,
    ) -> Result<()>;

    /// Discount factor used to form TD targets.
    fn discount(&self) -> f32;

    fn state_dim(&self) -> usize;

    fn action_dim(&self) -> usize;

    /// Restarts the critic's random stream so that a copy samples
    /// independently of the critic it was cloned from.
    fn reseed(&mut self, _seed: u64) {}

    fn weights(&self) -> &CriticWeights;

    fn weights_mut(&mut self) -> &mut CriticWeights;

    fn analytic_gradients(
        &mut self,
        _states: &Tensor,
        _actions: &Tensor,
    ) -> Result<Option<AnalyticGradients>> {
        Ok(None)
    }
}
