use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    bridge::GradientConfig,
    critic::BoltzmannConfig,
    error::{AgentError, Result},
    polyak::check_tau,
};

/// Hyperparameters of the actor-critic trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub buffer_capacity: usize,
    pub batch_size: usize,
    /// Soft update rate of the target networks.
    pub tau: f32,
    pub critic_learning_rate: f32,
    pub actor_learning_rate: f64,
    /// Exploration noise std before the `1 / episode` decay.
    pub action_noise_scale: f32,
    pub actor_hidden_layers: Vec<usize>,
    pub gradient: GradientConfig,
    /// Bootstrap from uniformly random next actions instead of the target actor.
    pub random_phase: bool,
    /// Mask `next_q` on terminal transitions.
    pub zero_terminal_bootstrap: bool,
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 100_000,
            batch_size: 32,
            tau: 0.1,
            critic_learning_rate: 1e-3,
            actor_learning_rate: 3e-3,
            action_noise_scale: 0.15,
            actor_hidden_layers: vec![128, 128],
            gradient: GradientConfig::default(),
            random_phase: false,
            zero_terminal_bootstrap: true,
            seed: None,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 || self.batch_size == 0 {
            return Err(AgentError::config(
                "buffer capacity and batch size must be non-zero",
            ));
        }
        check_tau(self.tau)?;
        if self.critic_learning_rate < 0.0 || self.actor_learning_rate < 0.0 {
            return Err(AgentError::config("learning rates must be non-negative"));
        }
        if self.action_noise_scale < 0.0 {
            return Err(AgentError::config("action noise scale must be non-negative"));
        }
        Ok(())
    }
}

/// Everything the `qac` binary needs for one training run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub agent: AgentConfig,
    pub critic: BoltzmannConfig,
    pub rollout: RolloutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    pub episodes: usize,
    pub max_steps_per_episode: usize,
    /// Episodes trained with random bootstrap actions before switching to the target actor.
    pub random_phase_episodes: usize,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            episodes: 50,
            max_steps_per_episode: 20,
            random_phase_episodes: 0,
        }
    }
}

impl RunConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: RunConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;
        self.critic.validate()?;
        if self.rollout.max_steps_per_episode == 0 {
            return Err(AgentError::config("episodes need at least one step"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::GradientMethod;

    #[test]
    fn defaults_are_valid() {
        RunConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RunConfig = serde_json::from_str(
            r#"{ "agent": { "tau": 0.5, "gradient": { "method": "five_point" } },
                 "critic": { "n_hidden": 8 } }"#,
        )
        .unwrap();
        assert_eq!(config.agent.tau, 0.5);
        assert_eq!(config.agent.batch_size, 32);
        assert_eq!(config.agent.gradient.method, GradientMethod::FivePoint);
        assert_eq!(config.agent.gradient.epsilon, 0.4);
        assert_eq!(config.critic.n_hidden, 8);
        assert_eq!(config.rollout.episodes, 50);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let config = AgentConfig {
            tau: 2.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));

        let config = AgentConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn reads_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{ "rollout": { "episodes": 3 } }"#).unwrap();
        let config = RunConfig::from_json_file(&path).unwrap();
        assert_eq!(config.rollout.episodes, 3);
    }
}
