use std::{fs::File, io::BufReader, io::BufWriter, path::Path};

use candle_core::{DType, Tensor};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::{
    actor::Actor,
    bridge::GradientBridge,
    config::AgentConfig,
    critic::{Critic, CriticWeights},
    device::DEVICE,
    env::BoxSpace,
    error::{AgentError, Result},
    experience::{Batch, ReplayBuffer, Transition},
    metrics::{TrainStats, TrainingLog},
    mlp::WeightSnapshot,
    polyak,
};

/// Serializable weights of all four networks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    pub actor: WeightSnapshot,
    pub actor_target: WeightSnapshot,
    pub critic: CriticWeights,
    pub critic_target: CriticWeights,
}

/// Actor-critic trainer pairing an opaque critic with a differentiable actor.
///
/// Each [`train`](Self::train) call samples a minibatch, applies the critic's
/// own learning rule sample by sample, ascends the bridged critic gradient
/// with the actor, and soft-updates both target copies.
pub struct ActorCriticAgent<C, A> {
    critic: C,
    critic_target: C,
    actor: A,
    actor_target: A,

    replay_memory: ReplayBuffer,
    bridge: GradientBridge,
    config: AgentConfig,
    observation_space: BoxSpace,
    action_space: BoxSpace,
    action_low: Tensor,
    action_high: Tensor,
    rng: StdRng,
    training_log: TrainingLog,
}

impl<C, A> ActorCriticAgent<C, A>
where
    C: Critic + Clone,
    A: Actor,
{
    pub fn new(
        observation_space: BoxSpace,
        action_space: BoxSpace,
        critic: C,
        actor: A,
        config: AgentConfig,
    ) -> Result<Self> {
        config.validate()?;
        let bridge = GradientBridge::new(config.gradient.clone())?;
        let state_dim = observation_space.dim();
        let action_dim = action_space.dim();
        if !action_space.is_bounded() {
            return Err(AgentError::config("action space must be bounded"));
        }

        // Fail early if the actor was built for other dimensions.
        let probe = Tensor::zeros((1, state_dim), DType::F32, &DEVICE)?;
        let out = actor.forward(&probe)?;
        if out.dims() != [1, action_dim] {
            return Err(AgentError::config(format!(
                "actor maps a state of dim {state_dim} to {:?}, expected [1, {action_dim}]",
                out.dims()
            )));
        }

        if critic.state_dim() != state_dim || critic.action_dim() != action_dim {
            return Err(AgentError::config(format!(
                "critic scores state/action of dims {}/{}, expected {state_dim}/{action_dim}",
                critic.state_dim(),
                critic.action_dim()
            )));
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut critic_target = critic.clone();
        critic_target.weights_mut().copy_from(critic.weights())?;
        critic_target.reseed(rng.random());
        let actor_target = actor.try_clone()?;
        log::info!(
            "actor-critic agent: state dim {}, action dim {}, buffer {}, batch {}",
            state_dim,
            action_dim,
            config.buffer_capacity,
            config.batch_size
        );

        Ok(Self {
            critic,
            critic_target,
            actor,
            actor_target,
            replay_memory: ReplayBuffer::new(config.buffer_capacity, state_dim, action_dim)?,
            bridge,
            action_low: Tensor::from_slice(action_space.low(), (1, action_dim), &DEVICE)?,
            action_high: Tensor::from_slice(action_space.high(), (1, action_dim), &DEVICE)?,
            config,
            observation_space,
            action_space,
            rng,
            training_log: TrainingLog::default(),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn critic(&self) -> &C {
        &self.critic
    }

    pub fn critic_target(&self) -> &C {
        &self.critic_target
    }

    pub fn actor(&self) -> &A {
        &self.actor
    }

    pub fn actor_target(&self) -> &A {
        &self.actor_target
    }

    pub fn replay_memory(&self) -> &ReplayBuffer {
        &self.replay_memory
    }

    pub fn training_log(&self) -> &TrainingLog {
        &self.training_log
    }

    pub fn observation_space(&self) -> &BoxSpace {
        &self.observation_space
    }

    pub fn action_space(&self) -> &BoxSpace {
        &self.action_space
    }

    pub fn set_random_phase(&mut self, random_phase: bool) {
        self.config.random_phase = random_phase;
    }

    pub fn push(&mut self, transition: Transition) -> Result<()> {
        self.replay_memory.push(transition)
    }

    fn as_batch(&self, states: &Tensor) -> Result<Tensor> {
        let states = if states.rank() == 1 {
            states.unsqueeze(0)?
        } else {
            states.clone()
        };
        let (_, dim) = states.dims2()?;
        if dim != self.observation_space.dim() {
            return Err(AgentError::config(format!(
                "expected states of dim {}, got {dim}",
                self.observation_space.dim()
            )));
        }
        Ok(states)
    }

    /// Actions from the live actor with exploration noise of std
    /// `noise / episode`, clipped to the action bounds.
    ///
    /// `noise` defaults to the configured scale; a single state is treated as
    /// a batch of one.
    pub fn get_action(
        &mut self,
        states: &Tensor,
        noise: Option<f32>,
        episode: usize,
    ) -> Result<Tensor> {
        let states = self.as_batch(states)?;
        let mut actions = self.actor.forward(&states)?.detach();
        let noise = noise.unwrap_or(self.config.action_noise_scale);
        if noise != 0.0 {
            let std = noise / episode.max(1) as f32;
            let normal = Normal::new(0.0f32, std.abs())
                .map_err(|e| AgentError::config(format!("invalid noise scale {std}: {e}")))?;
            let dim = self.action_space.dim();
            let draws: Vec<f32> = (0..dim).map(|_| normal.sample(&mut self.rng)).collect();
            let draws = Tensor::from_vec(draws, (1, dim), &DEVICE)?;
            actions = actions.broadcast_add(&draws)?;
        }
        Ok(actions
            .broadcast_maximum(&self.action_low)?
            .broadcast_minimum(&self.action_high)?)
    }

    pub fn get_target_actions(&self, states: &Tensor) -> Result<Tensor> {
        let states = self.as_batch(states)?;
        Ok(self.actor_target.forward(&states)?.detach())
    }

    /// One training call on a minibatch from the replay buffer.
    pub fn train(&mut self) -> Result<TrainStats> {
        let batch = self
            .replay_memory
            .sample(self.config.batch_size, &mut self.rng)?;
        let q_loss = self.train_critic(&batch)?;

        let states = batch.state_tensor()?;
        let (mu_loss, gradient_norm) = self.train_actor(&states)?;

        self.soft_update_targets()?;

        let stats = TrainStats {
            q_loss,
            mu_loss,
            gradient_norm,
        };
        log::debug!(
            "train #{}: q_loss {:.5}, mu_loss {:.5}, |dQ/da| {:.5}",
            self.training_log.len(),
            stats.q_loss,
            stats.mu_loss,
            stats.gradient_norm
        );
        self.training_log.record(stats);
        Ok(stats)
    }

    /// Applies the critic's learning rule to every sample in order; returns
    /// the mean squared TD error.
    fn train_critic(&mut self, batch: &Batch) -> Result<f32> {
        let action_dim = batch.action_dim;
        let next_actions: Vec<f32> = if self.config.random_phase {
            (0..batch.len())
                .flat_map(|_| self.action_space.sample(&mut self.rng))
                .collect()
        } else {
            self.get_target_actions(&batch.next_state_tensor()?)?
                .flatten_all()?
                .to_vec1::<f32>()?
        };

        let lr = self.config.critic_learning_rate;
        let mut total_loss = 0.0;
        for j in 0..batch.len() {
            let evaluation = self.critic.evaluate(batch.state(j), batch.action(j))?;
            let next_action = &next_actions[j * action_dim..(j + 1) * action_dim];
            let next = self
                .critic_target
                .evaluate(batch.next_state(j), next_action)?;
            let next_q = if batch.dones[j] && self.config.zero_terminal_bootstrap {
                0.0
            } else {
                next.q_value
            };
            let reward = batch.rewards[j];

            self.critic
                .update_weights(&evaluation.sample, evaluation.q_value, next_q, reward, lr)?;

            let q_target = reward + self.critic.discount() * next_q;
            total_loss += (evaluation.q_value - q_target).powi(2);
        }
        Ok(total_loss / batch.len() as f32)
    }

    /// Returns `-mean(Q)` before the step and the norm of the bridged gradient.
    fn train_actor(&mut self, states: &Tensor) -> Result<(f32, f32)> {
        let actions = self.actor.forward(states)?.detach();
        let objective = self.bridge.objective(&mut self.critic, states, &actions)?;
        self.actor.train_step(states, &objective)?;
        Ok((-objective.value(), objective.action_gradient_norm()?))
    }

    fn soft_update_targets(&mut self) -> Result<()> {
        polyak::soft_update_critic(&mut self.critic_target, &self.critic, self.config.tau)?;
        polyak::soft_update_actor(&mut self.actor_target, &self.actor, self.config.tau)
    }

    pub fn checkpoint(&self) -> Result<AgentCheckpoint> {
        Ok(AgentCheckpoint {
            actor: self.actor.snapshot()?,
            actor_target: self.actor_target.snapshot()?,
            critic: self.critic.weights().clone(),
            critic_target: self.critic_target.weights().clone(),
        })
    }

    pub fn restore(&mut self, checkpoint: &AgentCheckpoint) -> Result<()> {
        self.actor.restore(&checkpoint.actor)?;
        self.actor_target.restore(&checkpoint.actor_target)?;
        self.critic.weights_mut().copy_from(&checkpoint.critic)?;
        self.critic_target
            .weights_mut()
            .copy_from(&checkpoint.critic_target)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &self.checkpoint()?)?;
        log::info!("Saved agent weights to {}", path.display());
        Ok(())
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let checkpoint: AgentCheckpoint = serde_json::from_reader(reader)?;
        self.restore(&checkpoint)?;
        log::info!("Loaded agent weights from {}", path.display());
        Ok(())
    }
}
