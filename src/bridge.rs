//! Gradient bridge between the opaque critic and the differentiable actor.
//!
//! The critic only answers value queries, so `dQ/da` is estimated by probing
//! it at perturbed actions, one action dimension at a time, with the whole
//! minibatch evaluated in a single call per probe. The result is packaged as
//! a [`BridgedObjective`]: the forward value `mean(Q)` plus the per-sample
//! partials that the actor's own autograd then propagates into its weights.

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use crate::{
    critic::{Critic, Differentiated},
    device::DEVICE,
    error::{AgentError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientMethod {
    /// `(q(+e) - q(-e)) / 2e`
    Central,
    /// `(-q(+2e) + 8q(+e) - 8q(-e) + q(-2e)) / 12e`
    FivePoint,
    /// Closed form from the critic, central differences when it has none.
    Analytic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientConfig {
    pub method: GradientMethod,
    /// Finite-difference step.
    pub epsilon: f32,
    /// Also estimate `dQ/ds`; zeros of the right shape otherwise.
    pub state_gradients: bool,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            method: GradientMethod::Central,
            epsilon: 0.4,
            state_gradients: false,
        }
    }
}

/// Forward value and backward partials of `mean(Q(s, actor(s)))`.
///
/// `d_states` is `[state_dim, batch]` and `d_actions` is `[action_dim, batch]`,
/// both holding `dQ/dx` for each sample.
#[derive(Debug, Clone)]
pub struct BridgedObjective {
    value: f32,
    d_states: Tensor,
    d_actions: Tensor,
}

impl BridgedObjective {
    pub fn new(value: f32, d_states: Tensor, d_actions: Tensor) -> Result<Self> {
        let (_, batch_s) = d_states.dims2()?;
        let (_, batch_a) = d_actions.dims2()?;
        if batch_s != batch_a {
            return Err(AgentError::shape(format!(
                "state gradient covers {batch_s} samples, action gradient {batch_a}"
            )));
        }
        Ok(Self {
            value,
            d_states,
            d_actions,
        })
    }

    /// `mean(Q)` over the batch.
    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn d_states(&self) -> &Tensor {
        &self.d_states
    }

    pub fn d_actions(&self) -> &Tensor {
        &self.d_actions
    }

    pub fn batch_size(&self) -> usize {
        self.d_actions.dims()[1]
    }

    /// Loss to minimise whose gradient with respect to `actions` is
    /// `-dQ/da / batch`, i.e. the gradient of `-mean(Q)`.
    pub fn attach(&self, actions: &Tensor) -> Result<Tensor> {
        let (batch, action_dim) = actions.dims2()?;
        if self.d_actions.dims() != [action_dim, batch] {
            return Err(AgentError::shape(format!(
                "actions {:?} do not match bridged gradient {:?}",
                actions.dims(),
                self.d_actions.dims()
            )));
        }
        let upstream = self.d_actions.t()?.detach();
        Ok(actions
            .mul(&upstream)?
            .sum_all()?
            .affine(-1.0 / batch as f64, 0.0)?)
    }

    pub fn action_gradient_norm(&self) -> Result<f32> {
        Ok(self.d_actions.sqr()?.sum_all()?.sqrt()?.to_scalar::<f32>()?)
    }
}

#[derive(Debug, Clone)]
pub struct GradientBridge {
    config: GradientConfig,
}

impl GradientBridge {
    pub fn new(config: GradientConfig) -> Result<Self> {
        if !(config.epsilon > 0.0 && config.epsilon.is_finite()) {
            return Err(AgentError::config(format!(
                "finite-difference step must be positive, got {}",
                config.epsilon
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &GradientConfig {
        &self.config
    }

    /// Builds the objective for `states` `[batch, state_dim]` and the actor's
    /// `actions` `[batch, action_dim]`.
    pub fn objective<C: Critic>(
        &self,
        critic: &mut C,
        states: &Tensor,
        actions: &Tensor,
    ) -> Result<BridgedObjective> {
        let (batch, state_dim) = states.dims2()?;
        let (batch_a, _) = actions.dims2()?;
        if batch != batch_a {
            return Err(AgentError::shape(format!(
                "{batch} states but {batch_a} actions"
            )));
        }

        if self.config.method == GradientMethod::Analytic {
            if let Some(grads) = critic.analytic_gradients(states, actions)? {
                let sign = match grads.wrt {
                    Differentiated::Value => 1.0,
                    // Q = -F
                    Differentiated::FreeEnergy => -1.0,
                };
                let value = grads.q_values.mean_all()?.to_scalar::<f32>()?;
                let d_actions = grads.d_actions.t()?.affine(sign, 0.0)?;
                let d_states = if self.config.state_gradients {
                    grads.d_states.t()?.affine(sign, 0.0)?
                } else {
                    Tensor::zeros((state_dim, batch), DType::F32, &DEVICE)?
                };
                return BridgedObjective::new(value, d_states, d_actions);
            }
            log::debug!("critic offers no analytic gradient, using central differences");
        }

        let value = critic
            .evaluate_batch(states, actions)?
            .mean_all()?
            .to_scalar::<f32>()?;
        let d_actions = self.action_gradient(critic, states, actions)?;
        let d_states = if self.config.state_gradients {
            self.state_gradient(critic, states, actions)?
        } else {
            Tensor::zeros((state_dim, batch), DType::F32, &DEVICE)?
        };
        BridgedObjective::new(value, d_states, d_actions)
    }

    /// `dQ/da` as `[action_dim, batch]`.
    pub fn action_gradient<C: Critic>(
        &self,
        critic: &mut C,
        states: &Tensor,
        actions: &Tensor,
    ) -> Result<Tensor> {
        let (_, action_dim) = actions.dims2()?;
        let mut columns = Vec::with_capacity(action_dim);
        for i in 0..action_dim {
            columns.push(self.partial(|offset| {
                let shifted = shift_column(actions, i, offset)?;
                critic.evaluate_batch(states, &shifted)
            })?);
        }
        Ok(Tensor::stack(&columns, 0)?)
    }

    /// `dQ/ds` as `[state_dim, batch]`.
    pub fn state_gradient<C: Critic>(
        &self,
        critic: &mut C,
        states: &Tensor,
        actions: &Tensor,
    ) -> Result<Tensor> {
        let (_, state_dim) = states.dims2()?;
        let mut columns = Vec::with_capacity(state_dim);
        for i in 0..state_dim {
            columns.push(self.partial(|offset| {
                let shifted = shift_column(states, i, offset)?;
                critic.evaluate_batch(&shifted, actions)
            })?);
        }
        Ok(Tensor::stack(&columns, 0)?)
    }

    /// Derivative along one coordinate given a probe `offset -> q[batch]`.
    fn partial<F>(&self, mut probe: F) -> Result<Tensor>
    where
        F: FnMut(f32) -> Result<Tensor>,
    {
        let eps = self.config.epsilon;
        match self.config.method {
            GradientMethod::FivePoint => {
                let q_plus = probe(eps)?;
                let q_plus2 = probe(2.0 * eps)?;
                let q_minus = probe(-eps)?;
                let q_minus2 = probe(-2.0 * eps)?;
                let numerator = ((q_plus - &q_minus)?.affine(8.0, 0.0)? - q_plus2)?;
                let numerator = (numerator + q_minus2)?;
                Ok(numerator.affine(1.0 / (12.0 * eps as f64), 0.0)?)
            }
            GradientMethod::Central | GradientMethod::Analytic => {
                let q_plus = probe(eps)?;
                let q_minus = probe(-eps)?;
                Ok((q_plus - q_minus)?.affine(1.0 / (2.0 * eps as f64), 0.0)?)
            }
        }
    }
}

/// Copy of `x` `[batch, dim]` with `offset` added to column `column`.
fn shift_column(x: &Tensor, column: usize, offset: f32) -> Result<Tensor> {
    let (_, dim) = x.dims2()?;
    let mut row = vec![0.0f32; dim];
    row[column] = offset;
    let shift = Tensor::from_vec(row, (1, dim), x.device())?.to_dtype(x.dtype())?;
    Ok(x.broadcast_add(&shift)?)
}
