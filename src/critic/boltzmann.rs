//! Boltzmann-machine critic whose hidden spins are sampled by simulated annealing.
//!
//! The state and action are clamped onto the visible units. For each
//! evaluation the hidden spins are annealed `n_samples` times, and the value
//! is the negated free energy of the empirical spin distribution:
//!
//! ```text
//! F = <E> + (1/beta) * sum_c p(c) ln p(c),    Q = -F
//! ```
//!
//! Learning follows the free-energy TD rule: with
//! `delta = r + gamma * Q(s', a') - Q(s, a)`, visible-hidden couplings move by
//! `lr * delta * v_i * <h_k>` and hidden-hidden couplings by
//! `lr * delta * <h_k h_l>`.

use std::{collections::HashMap, sync::Arc};

use candle_core::Tensor;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use super::{AnalyticGradients, Critic, CouplingLayout, CriticWeights, Differentiated, Evaluation};
use crate::{
    device::DEVICE,
    env::BoxSpace,
    error::{AgentError, Result},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoltzmannConfig {
    /// Hidden spins, split into two equal layers.
    pub n_hidden: usize,
    /// Final inverse temperature of the anneal.
    pub beta: f32,
    pub n_annealing_steps: usize,
    /// Independent anneals averaged per evaluation.
    pub n_samples: usize,
    pub discount: f32,
    pub init_scale: f32,
    pub seed: Option<u64>,
}

impl Default for BoltzmannConfig {
    fn default() -> Self {
        Self {
            n_hidden: 16,
            beta: 2.0,
            n_annealing_steps: 100,
            n_samples: 30,
            discount: 0.99,
            init_scale: 0.01,
            seed: None,
        }
    }
}

impl BoltzmannConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.beta > 0.0 && self.beta.is_finite()) {
            return Err(AgentError::config(format!("beta must be positive, got {}", self.beta)));
        }
        if self.n_annealing_steps == 0 || self.n_samples == 0 {
            return Err(AgentError::config(
                "annealing steps and samples per evaluation must be non-zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.discount) {
            return Err(AgentError::config(format!(
                "discount must lie in [0, 1], got {}",
                self.discount
            )));
        }
        if self.init_scale < 0.0 {
            return Err(AgentError::config("init_scale must be non-negative"));
        }
        Ok(())
    }
}

/// Clamped visible units and the spin statistics of one evaluation.
#[derive(Debug, Clone)]
pub struct SpinSample {
    pub visible: Vec<f32>,
    /// `<h_k>` per hidden spin.
    pub mean_hidden: Vec<f32>,
    /// `<h_k h_l>` per hidden-hidden edge, in layout order.
    pub mean_hidden_products: Vec<f32>,
}

/// Affine map of each box component onto `[-1, 1]`.
#[derive(Debug, Clone)]
struct Normalizer {
    low: Vec<f32>,
    scale: Vec<f32>,
}

impl Normalizer {
    fn new(space: &BoxSpace) -> Self {
        let scale = space
            .low()
            .iter()
            .zip(space.high().iter())
            .map(|(lo, hi)| if hi > lo { 2.0 / (hi - lo) } else { 0.0 })
            .collect();
        Self {
            low: space.low().to_vec(),
            scale,
        }
    }

    fn dim(&self) -> usize {
        self.low.len()
    }

    fn extend(&self, values: &[f32], out: &mut Vec<f32>) {
        for (i, x) in values.iter().enumerate() {
            out.push((x - self.low[i]) * self.scale[i] - 1.0);
        }
    }
}

#[derive(Clone)]
pub struct BoltzmannCritic {
    config: BoltzmannConfig,
    state_norm: Normalizer,
    action_norm: Normalizer,
    weights: CriticWeights,
    /// Hidden-hidden neighbours of every spin as `(neighbour, edge)` pairs.
    neighbours: Vec<Vec<(usize, usize)>>,
    rng: StdRng,
}

impl BoltzmannCritic {
    pub fn new(
        observation_space: &BoxSpace,
        action_space: &BoxSpace,
        config: BoltzmannConfig,
    ) -> Result<Self> {
        config.validate()?;
        if !observation_space.is_bounded() || !action_space.is_bounded() {
            return Err(AgentError::config(
                "Boltzmann critic needs finite observation and action bounds",
            ));
        }
        let n_visible = observation_space.dim() + action_space.dim();
        let layout = Arc::new(CouplingLayout::bipartite(n_visible, config.n_hidden)?);

        let mut neighbours = vec![Vec::new(); layout.n_hidden()];
        for (edge, (k, l)) in layout.hidden_hidden().iter().enumerate() {
            neighbours[*k].push((*l, edge));
            neighbours[*l].push((*k, edge));
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let weights = CriticWeights::random(layout, config.init_scale, &mut rng);
        log::info!(
            "Boltzmann critic: {} visible, {} hidden, {} couplings",
            n_visible,
            config.n_hidden,
            weights.hidden_hidden().len() + weights.visible_hidden().len()
        );

        Ok(Self {
            state_norm: Normalizer::new(observation_space),
            action_norm: Normalizer::new(action_space),
            config,
            weights,
            neighbours,
            rng,
        })
    }

    pub fn config(&self) -> &BoltzmannConfig {
        &self.config
    }

    fn encode(&self, state: &[f32], action: &[f32]) -> Result<Vec<f32>> {
        if state.len() != self.state_norm.dim() || action.len() != self.action_norm.dim() {
            return Err(AgentError::config(format!(
                "critic expects state/action of dims {}/{}, got {}/{}",
                self.state_norm.dim(),
                self.action_norm.dim(),
                state.len(),
                action.len()
            )));
        }
        let mut visible = Vec::with_capacity(self.state_norm.dim() + self.action_norm.dim());
        self.state_norm.extend(state, &mut visible);
        self.action_norm.extend(action, &mut visible);
        Ok(visible)
    }

    /// Field `sum_i w_vh[i, k] v_i` acting on each hidden spin.
    fn visible_field(&self, visible: &[f32]) -> Vec<f32> {
        let layout = self.weights.layout();
        let mut field = vec![0.0; layout.n_hidden()];
        for ((i, k), w) in layout
            .visible_hidden()
            .iter()
            .zip(self.weights.visible_hidden().iter())
        {
            field[*k] += w * visible[*i];
        }
        field
    }

    fn energy(&self, field: &[f32], spins: &[i8]) -> f32 {
        let couplings = self.weights.hidden_hidden();
        let linear: f32 = field
            .iter()
            .zip(spins.iter())
            .map(|(f, h)| f * *h as f32)
            .sum();
        let quadratic: f32 = self
            .weights
            .layout()
            .hidden_hidden()
            .iter()
            .zip(couplings.iter())
            .map(|((k, l), j)| j * (spins[*k] * spins[*l]) as f32)
            .sum();
        -linear - quadratic
    }

    fn anneal(&mut self, field: &[f32]) -> Vec<i8> {
        let n = field.len();
        let couplings = self.weights.hidden_hidden();
        let mut spins: Vec<i8> = (0..n)
            .map(|_| if self.rng.random::<bool>() { 1 } else { -1 })
            .collect();
        let steps = self.config.n_annealing_steps;
        for t in 0..steps {
            let beta_t = self.config.beta * (t + 1) as f32 / steps as f32;
            for k in 0..n {
                let local: f32 = field[k]
                    + self.neighbours[k]
                        .iter()
                        .map(|(l, edge)| couplings[*edge] * spins[*l] as f32)
                        .sum::<f32>();
                let delta_e = 2.0 * spins[k] as f32 * local;
                if delta_e <= 0.0 || self.rng.random::<f32>() < (-beta_t * delta_e).exp() {
                    spins[k] = -spins[k];
                }
            }
        }
        spins
    }

    /// Free energy of the clamped visible vector and the spin statistics.
    fn sample(&mut self, visible: Vec<f32>) -> (f32, SpinSample) {
        let field = self.visible_field(&visible);
        let n_samples = self.config.n_samples;
        let n_hidden = field.len();
        let hh_edges = self.weights.layout().hidden_hidden().to_vec();

        let mut mean_energy = 0.0;
        let mut mean_hidden = vec![0.0; n_hidden];
        let mut mean_hidden_products = vec![0.0; hh_edges.len()];
        let mut counts: HashMap<Vec<i8>, usize> = HashMap::new();
        for _ in 0..n_samples {
            let spins = self.anneal(&field);
            mean_energy += self.energy(&field, &spins);
            for (m, h) in mean_hidden.iter_mut().zip(spins.iter()) {
                *m += *h as f32;
            }
            for (m, (k, l)) in mean_hidden_products.iter_mut().zip(hh_edges.iter()) {
                *m += (spins[*k] * spins[*l]) as f32;
            }
            *counts.entry(spins).or_insert(0) += 1;
        }

        let norm = 1.0 / n_samples as f32;
        mean_energy *= norm;
        mean_hidden.iter_mut().for_each(|m| *m *= norm);
        mean_hidden_products.iter_mut().for_each(|m| *m *= norm);
        let neg_entropy: f32 = counts
            .values()
            .map(|c| {
                let p = *c as f32 * norm;
                p * p.ln()
            })
            .sum();
        let free_energy = mean_energy + neg_entropy / self.config.beta;

        (
            free_energy,
            SpinSample {
                visible,
                mean_hidden,
                mean_hidden_products,
            },
        )
    }

    fn rows(states: &Tensor, actions: &Tensor) -> Result<(Vec<Vec<f32>>, Vec<Vec<f32>>)> {
        let states = states.to_vec2::<f32>()?;
        let actions = actions.to_vec2::<f32>()?;
        if states.len() != actions.len() {
            return Err(AgentError::shape(format!(
                "state batch of {} does not match action batch of {}",
                states.len(),
                actions.len()
            )));
        }
        Ok((states, actions))
    }
}

impl Critic for BoltzmannCritic {
    type Sample = SpinSample;

    fn evaluate(&mut self, state: &[f32], action: &[f32]) -> Result<Evaluation<SpinSample>> {
        let visible = self.encode(state, action)?;
        let (free_energy, sample) = self.sample(visible);
        Ok(Evaluation {
            q_value: -free_energy,
            sample,
        })
    }

    fn evaluate_batch(&mut self, states: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let (states, actions) = Self::rows(states, actions)?;
        let mut q_values = Vec::with_capacity(states.len());
        for (state, action) in states.iter().zip(actions.iter()) {
            let visible = self.encode(state, action)?;
            let (free_energy, _) = self.sample(visible);
            q_values.push(-free_energy);
        }
        let n = q_values.len();
        Ok(Tensor::from_vec(q_values, n, &DEVICE)?)
    }

    fn update_weights(
        &mut self,
        sample: &SpinSample,
        q_value: f32,
        next_q_value: f32,
        reward: f32,
        learning_rate: f32,
    ) -> Result<()> {
        let layout = self.weights.layout();
        if sample.visible.len() != layout.n_visible()
            || sample.mean_hidden.len() != layout.n_hidden()
            || sample.mean_hidden_products.len() != layout.hidden_hidden().len()
        {
            return Err(AgentError::shape("spin sample does not match critic layout"));
        }
        let step = learning_rate * (reward + self.config.discount * next_q_value - q_value);
        let visible_hidden = layout.visible_hidden().to_vec();

        for (w, hh) in self
            .weights
            .hidden_hidden_mut()
            .iter_mut()
            .zip(sample.mean_hidden_products.iter())
        {
            *w += step * hh;
        }
        for (w, (i, k)) in self
            .weights
            .visible_hidden_mut()
            .iter_mut()
            .zip(visible_hidden.iter())
        {
            *w += step * sample.visible[*i] * sample.mean_hidden[*k];
        }
        Ok(())
    }

    fn discount(&self) -> f32 {
        self.config.discount
    }

    fn state_dim(&self) -> usize {
        self.state_norm.dim()
    }

    fn action_dim(&self) -> usize {
        self.action_norm.dim()
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn weights(&self) -> &CriticWeights {
        &self.weights
    }

    fn weights_mut(&mut self) -> &mut CriticWeights {
        &mut self.weights
    }

    /// `dF/dv_i = -sum_k w_vh[i, k] <h_k>`, chained through the box normalisation.
    fn analytic_gradients(
        &mut self,
        states: &Tensor,
        actions: &Tensor,
    ) -> Result<Option<AnalyticGradients>> {
        let (state_rows, action_rows) = Self::rows(states, actions)?;
        let batch = state_rows.len();
        let state_dim = self.state_norm.dim();
        let action_dim = self.action_norm.dim();

        let mut q_values = Vec::with_capacity(batch);
        let mut d_states = Vec::with_capacity(batch * state_dim);
        let mut d_actions = Vec::with_capacity(batch * action_dim);
        for (state, action) in state_rows.iter().zip(action_rows.iter()) {
            let visible = self.encode(state, action)?;
            let (free_energy, sample) = self.sample(visible);
            q_values.push(-free_energy);

            let mut d_visible = vec![0.0f32; state_dim + action_dim];
            for ((i, k), w) in self
                .weights
                .layout()
                .visible_hidden()
                .iter()
                .zip(self.weights.visible_hidden().iter())
            {
                d_visible[*i] -= w * sample.mean_hidden[*k];
            }
            for (i, scale) in self.state_norm.scale.iter().enumerate() {
                d_states.push(d_visible[i] * scale);
            }
            for (i, scale) in self.action_norm.scale.iter().enumerate() {
                d_actions.push(d_visible[state_dim + i] * scale);
            }
        }

        Ok(Some(AnalyticGradients {
            q_values: Tensor::from_vec(q_values, batch, &DEVICE)?,
            d_states: Tensor::from_vec(d_states, (batch, state_dim), &DEVICE)?,
            d_actions: Tensor::from_vec(d_actions, (batch, action_dim), &DEVICE)?,
            wrt: Differentiated::FreeEnergy,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn small_critic(seed: u64) -> BoltzmannCritic {
        let observation = BoxSpace::uniform(2, -1.0, 1.0).unwrap();
        let action = BoxSpace::uniform(1, -2.0, 2.0).unwrap();
        let config = BoltzmannConfig {
            n_hidden: 4,
            n_annealing_steps: 20,
            n_samples: 8,
            init_scale: 0.1,
            seed: Some(seed),
            ..Default::default()
        };
        BoltzmannCritic::new(&observation, &action, config).unwrap()
    }

    #[test]
    fn same_seed_gives_same_values() {
        let mut a = small_critic(5);
        let mut b = small_critic(5);
        let qa = a.evaluate(&[0.1, -0.3], &[0.5]).unwrap().q_value;
        let qb = b.evaluate(&[0.1, -0.3], &[0.5]).unwrap().q_value;
        assert_eq!(qa, qb);
        assert!(qa.is_finite());
    }

    #[test]
    fn sample_statistics_are_spin_averages() {
        let mut critic = small_critic(9);
        let eval = critic.evaluate(&[0.0, 0.0], &[0.0]).unwrap();
        assert_eq!(eval.sample.visible.len(), 3);
        assert_eq!(eval.sample.mean_hidden.len(), 4);
        assert_eq!(eval.sample.mean_hidden_products.len(), 4);
        for m in eval
            .sample
            .mean_hidden
            .iter()
            .chain(eval.sample.mean_hidden_products.iter())
        {
            assert!((-1.0..=1.0).contains(m));
        }
    }

    #[test]
    fn zero_td_error_leaves_weights_untouched() {
        let mut critic = small_critic(2);
        let eval = critic.evaluate(&[0.2, 0.2], &[1.0]).unwrap();
        let before = critic.weights().clone();
        let q = eval.q_value;
        // reward chosen so that r + gamma * q - q == 0
        let reward = q - critic.discount() * q;
        critic.update_weights(&eval.sample, q, q, reward, 0.5).unwrap();
        for (a, b) in before
            .visible_hidden()
            .iter()
            .zip(critic.weights().visible_hidden())
        {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn positive_td_error_moves_weights_along_statistics() {
        let mut critic = small_critic(4);
        let eval = critic.evaluate(&[0.5, -0.5], &[1.0]).unwrap();
        let before = critic.weights().clone();
        critic
            .update_weights(&eval.sample, 0.0, 0.0, 1.0, 0.1)
            .unwrap();
        let layout = before.layout().clone();
        for edge in 0..layout.hidden_hidden().len() {
            let expected = before.hidden_hidden()[edge] + 0.1 * eval.sample.mean_hidden_products[edge];
            assert_abs_diff_eq!(critic.weights().hidden_hidden()[edge], expected, epsilon = 1e-6);
        }
        for (edge, (i, k)) in layout.visible_hidden().iter().enumerate() {
            let expected = before.visible_hidden()[edge]
                + 0.1 * eval.sample.visible[*i] * eval.sample.mean_hidden[*k];
            assert_abs_diff_eq!(critic.weights().visible_hidden()[edge], expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn batch_evaluation_has_one_value_per_row() {
        let mut critic = small_critic(1);
        let states = Tensor::from_slice(&[0.0f32, 0.1, 0.2, 0.3, -0.4, 0.5], (3, 2), &DEVICE).unwrap();
        let actions = Tensor::from_slice(&[0.0f32, 1.0, -1.0], (3, 1), &DEVICE).unwrap();
        let q = critic.evaluate_batch(&states, &actions).unwrap();
        assert_eq!(q.dims(), &[3]);

        let grads = critic.analytic_gradients(&states, &actions).unwrap().unwrap();
        assert_eq!(grads.d_states.dims(), &[3, 2]);
        assert_eq!(grads.d_actions.dims(), &[3, 1]);
        assert_eq!(grads.wrt, Differentiated::FreeEnergy);
    }

    #[test]
    fn unbounded_spaces_are_rejected() {
        let observation = BoxSpace::uniform(1, f32::NEG_INFINITY, f32::INFINITY).unwrap();
        let action = BoxSpace::uniform(1, -1.0, 1.0).unwrap();
        let result = BoltzmannCritic::new(&observation, &action, BoltzmannConfig::default());
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn wrong_input_dimension_is_an_error() {
        let mut critic = small_critic(0);
        assert!(critic.evaluate(&[0.0], &[0.0]).is_err());
    }
}
