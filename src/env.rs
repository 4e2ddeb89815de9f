use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Axis-aligned box of per-component `[low, high]` bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxSpace {
    low: Vec<f32>,
    high: Vec<f32>,
}

impl BoxSpace {
    pub fn new(low: Vec<f32>, high: Vec<f32>) -> Result<Self> {
        if low.is_empty() {
            return Err(AgentError::config("box space must have at least one dimension"));
        }
        if low.len() != high.len() {
            return Err(AgentError::config(format!(
                "box bounds have mismatched lengths: low {} vs high {}",
                low.len(),
                high.len()
            )));
        }
        for (i, (lo, hi)) in low.iter().zip(high.iter()).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(AgentError::config(format!(
                    "invalid bounds [{lo}, {hi}] in dimension {i}"
                )));
            }
        }
        Ok(Self { low, high })
    }

    /// Same bounds `[low, high]` on every one of `dim` components.
    pub fn uniform(dim: usize, low: f32, high: f32) -> Result<Self> {
        Self::new(vec![low; dim], vec![high; dim])
    }

    pub fn dim(&self) -> usize {
        self.low.len()
    }

    pub fn low(&self) -> &[f32] {
        &self.low
    }

    pub fn high(&self) -> &[f32] {
        &self.high
    }

    pub fn is_bounded(&self) -> bool {
        self.low
            .iter()
            .chain(self.high.iter())
            .all(|x| x.is_finite())
    }

    pub fn clip(&self, values: &mut [f32]) {
        for (i, val) in values.iter_mut().enumerate() {
            *val = val.clamp(self.low[i], self.high[i]);
        }
    }

    pub fn contains(&self, values: &[f32]) -> bool {
        values.len() == self.dim()
            && values
                .iter()
                .enumerate()
                .all(|(i, v)| *v >= self.low[i] && *v <= self.high[i])
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f32> {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(lo, hi)| if lo == hi { *lo } else { rng.random_range(*lo..=*hi) })
            .collect()
    }
}

/// Outcome of a single environment transition.
#[derive(Debug, Clone)]
pub struct Step {
    pub next_state: Vec<f32>,
    pub reward: f32,
    pub done: bool,
}

/// Continuous-control environment driven by the rollout loop.
pub trait Environment {
    fn reset(&mut self) -> Vec<f32>;

    fn step(&mut self, action: &[f32]) -> Step;

    fn action_space(&self) -> &BoxSpace;

    fn observation_space(&self) -> &BoxSpace;
}
