use candle_core::Tensor;
use rand::Rng;

use crate::{
    device::DEVICE,
    error::{AgentError, Result},
};

/// One (state, action, reward, next_state, done) experience tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: Vec<f32>,
    pub action: Vec<f32>,
    pub reward: f32,
    pub next_state: Vec<f32>,
    pub done: bool,
}

/// Minibatch drawn from the replay buffer, stored row-major.
#[derive(Debug, Clone)]
pub struct Batch {
    pub states: Vec<f32>,
    pub actions: Vec<f32>,
    pub rewards: Vec<f32>,
    pub next_states: Vec<f32>,
    pub dones: Vec<bool>,
    pub state_dim: usize,
    pub action_dim: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    pub fn state(&self, j: usize) -> &[f32] {
        &self.states[j * self.state_dim..(j + 1) * self.state_dim]
    }

    pub fn action(&self, j: usize) -> &[f32] {
        &self.actions[j * self.action_dim..(j + 1) * self.action_dim]
    }

    pub fn next_state(&self, j: usize) -> &[f32] {
        &self.next_states[j * self.state_dim..(j + 1) * self.state_dim]
    }

    pub fn state_tensor(&self) -> Result<Tensor> {
        Ok(Tensor::from_slice(
            &self.states,
            (self.len(), self.state_dim),
            &DEVICE,
        )?)
    }

    pub fn action_tensor(&self) -> Result<Tensor> {
        Ok(Tensor::from_slice(
            &self.actions,
            (self.len(), self.action_dim),
            &DEVICE,
        )?)
    }

    pub fn next_state_tensor(&self) -> Result<Tensor> {
        Ok(Tensor::from_slice(
            &self.next_states,
            (self.len(), self.state_dim),
            &DEVICE,
        )?)
    }

    /// Rewards as a `[batch, 1]` column.
    pub fn reward_tensor(&self) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.rewards, (self.len(), 1), &DEVICE)?)
    }
}

/// Fixed-capacity circular store of transitions held in parallel arrays.
///
/// `ptr` is always the next write slot; once `size == capacity` the oldest
/// transition is overwritten.
pub struct ReplayBuffer {
    states: Vec<f32>,
    next_states: Vec<f32>,
    actions: Vec<f32>,
    rewards: Vec<f32>,
    dones: Vec<bool>,
    state_dim: usize,
    action_dim: usize,
    capacity: usize,
    ptr: usize,
    size: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, state_dim: usize, action_dim: usize) -> Result<Self> {
        if capacity == 0 || state_dim == 0 || action_dim == 0 {
            return Err(AgentError::config(format!(
                "replay buffer needs non-zero capacity and dimensions \
                 (capacity {capacity}, state {state_dim}, action {action_dim})"
            )));
        }
        Ok(Self {
            states: vec![0.0; capacity * state_dim],
            next_states: vec![0.0; capacity * state_dim],
            actions: vec![0.0; capacity * action_dim],
            rewards: vec![0.0; capacity],
            dones: vec![false; capacity],
            state_dim,
            action_dim,
            capacity,
            ptr: 0,
            size: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    pub fn push(&mut self, transition: Transition) -> Result<()> {
        let Transition {
            state,
            action,
            reward,
            next_state,
            done,
        } = transition;
        if state.len() != self.state_dim
            || next_state.len() != self.state_dim
            || action.len() != self.action_dim
        {
            return Err(AgentError::config(format!(
                "transition dimensions (state {}, next_state {}, action {}) do not match \
                 buffer (state {}, action {})",
                state.len(),
                next_state.len(),
                action.len(),
                self.state_dim,
                self.action_dim
            )));
        }

        let s = self.ptr * self.state_dim;
        let a = self.ptr * self.action_dim;
        self.states[s..s + self.state_dim].copy_from_slice(&state);
        self.next_states[s..s + self.state_dim].copy_from_slice(&next_state);
        self.actions[a..a + self.action_dim].copy_from_slice(&action);
        self.rewards[self.ptr] = reward;
        self.dones[self.ptr] = done;

        self.ptr = (self.ptr + 1) % self.capacity;
        self.size = (self.size + 1).min(self.capacity);
        Ok(())
    }

    /// Draws `batch_size` indices uniformly from `[0, len)` with replacement.
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Result<Batch> {
        if self.size == 0 {
            return Err(AgentError::EmptyBuffer);
        }
        if batch_size > self.size {
            log::warn!(
                "sampling batch of {} from only {} stored transitions",
                batch_size,
                self.size
            );
        }

        let mut batch = Batch {
            states: Vec::with_capacity(batch_size * self.state_dim),
            actions: Vec::with_capacity(batch_size * self.action_dim),
            rewards: Vec::with_capacity(batch_size),
            next_states: Vec::with_capacity(batch_size * self.state_dim),
            dones: Vec::with_capacity(batch_size),
            state_dim: self.state_dim,
            action_dim: self.action_dim,
        };
        for _ in 0..batch_size {
            let idx = rng.random_range(0..self.size);
            let s = idx * self.state_dim;
            let a = idx * self.action_dim;
            batch
                .states
                .extend_from_slice(&self.states[s..s + self.state_dim]);
            batch
                .next_states
                .extend_from_slice(&self.next_states[s..s + self.state_dim]);
            batch
                .actions
                .extend_from_slice(&self.actions[a..a + self.action_dim]);
            batch.rewards.push(self.rewards[idx]);
            batch.dones.push(self.dones[idx]);
        }
        Ok(batch)
    }
}
