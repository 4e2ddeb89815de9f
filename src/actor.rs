use candle_core::Tensor;

use crate::{
    bridge::BridgedObjective,
    device::DEVICE,
    env::BoxSpace,
    error::{AgentError, Result},
    mlp::{MultiLayerPerceptron, WeightSnapshot},
};

/// Differentiable policy mapping a `[batch, state_dim]` tensor to `[batch, action_dim]`.
pub trait Actor {
    fn forward(&self, states: &Tensor) -> Result<Tensor>;

    /// One ascent step on the objective, its gradient supplied from outside.
    fn train_step(&mut self, states: &Tensor, objective: &BridgedObjective) -> Result<()>;

    fn snapshot(&self) -> Result<WeightSnapshot>;

    fn restore(&mut self, snapshot: &WeightSnapshot) -> Result<()>;

    fn try_clone(&self) -> Result<Self>
    where
        Self: Sized;
}

/// MLP policy whose `tanh` head is rescaled onto the action box.
pub struct MlpActor {
    mlp: MultiLayerPerceptron,
    low: Tensor,
    span: Tensor,
    action_space: BoxSpace,
}

impl MlpActor {
    pub fn new(
        observation_space: &BoxSpace,
        action_space: &BoxSpace,
        hidden_layers: &[usize],
        learning_rate: f64,
    ) -> Result<Self> {
        if !action_space.is_bounded() {
            return Err(AgentError::config("actor needs a bounded action space"));
        }
        let mut topology = Vec::with_capacity(hidden_layers.len() + 2);
        topology.push(observation_space.dim());
        topology.extend_from_slice(hidden_layers);
        topology.push(action_space.dim());
        let mlp = MultiLayerPerceptron::new(&topology, learning_rate)?;
        Self::from_mlp(mlp, action_space)
    }

    fn from_mlp(mlp: MultiLayerPerceptron, action_space: &BoxSpace) -> Result<Self> {
        let dim = action_space.dim();
        let span: Vec<f32> = action_space
            .low()
            .iter()
            .zip(action_space.high().iter())
            .map(|(lo, hi)| hi - lo)
            .collect();
        Ok(Self {
            low: Tensor::from_slice(action_space.low(), (1, dim), &DEVICE)?,
            span: Tensor::from_slice(&span, (1, dim), &DEVICE)?,
            mlp,
            action_space: action_space.clone(),
        })
    }

    pub fn topology(&self) -> &[usize] {
        &self.mlp.topology
    }
}

impl Actor for MlpActor {
    fn forward(&self, states: &Tensor) -> Result<Tensor> {
        let unit = self.mlp.output(states)?;
        // [-1, 1] -> [low, high]
        Ok(unit
            .affine(0.5, 0.5)?
            .broadcast_mul(&self.span)?
            .broadcast_add(&self.low)?)
    }

    fn train_step(&mut self, states: &Tensor, objective: &BridgedObjective) -> Result<()> {
        let actions = self.forward(states)?;
        let loss = objective.attach(&actions)?;
        self.mlp.backward_step(&loss)
    }

    fn snapshot(&self) -> Result<WeightSnapshot> {
        self.mlp.snapshot()
    }

    fn restore(&mut self, snapshot: &WeightSnapshot) -> Result<()> {
        self.mlp.restore(snapshot)
    }

    fn try_clone(&self) -> Result<Self> {
        Self::from_mlp(self.mlp.try_clone()?, &self.action_space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> MlpActor {
        let observation = BoxSpace::uniform(3, -1.0, 1.0).unwrap();
        let action = BoxSpace::new(vec![-2.0, 0.0], vec![2.0, 1.0]).unwrap();
        MlpActor::new(&observation, &action, &[16, 16], 1e-2).unwrap()
    }

    #[test]
    fn outputs_lie_in_action_box() {
        let actor = actor();
        let states =
            Tensor::from_slice(&[9.0f32, -9.0, 0.0, 0.1, 0.2, 0.3], (2, 3), &DEVICE).unwrap();
        let actions = actor.forward(&states).unwrap().to_vec2::<f32>().unwrap();
        for row in actions {
            assert!((-2.0..=2.0).contains(&row[0]));
            assert!((0.0..=1.0).contains(&row[1]));
        }
    }

    #[test]
    fn train_step_follows_injected_gradient() {
        let mut actor = actor();
        let states =
            Tensor::from_slice(&[0.3f32, -0.2, 0.1, -0.5, 0.4, 0.0], (2, 3), &DEVICE).unwrap();
        let before = actor.forward(&states).unwrap().to_vec2::<f32>().unwrap();

        // dQ/da = +1 for the first action dimension, 0 for the second.
        let d_actions = Tensor::from_slice(&[1.0f32, 1.0, 0.0, 0.0], (2, 2), &DEVICE).unwrap();
        let d_states = Tensor::zeros((3, 2), candle_core::DType::F32, &DEVICE).unwrap();
        let objective = BridgedObjective::new(0.0, d_states, d_actions).unwrap();
        for _ in 0..20 {
            actor.train_step(&states, &objective).unwrap();
        }

        let after = actor.forward(&states).unwrap().to_vec2::<f32>().unwrap();
        let sum_first = |rows: &[Vec<f32>]| rows.iter().map(|r| r[0]).sum::<f32>();
        assert!(
            sum_first(&after) > sum_first(&before),
            "first action should increase: {before:?} -> {after:?}"
        );
    }

    #[test]
    fn clone_is_independent() {
        let actor = actor();
        let mut copy = actor.try_clone().unwrap();
        assert_eq!(actor.snapshot().unwrap(), copy.snapshot().unwrap());
        let mut shifted = copy.snapshot().unwrap();
        for t in shifted.tensors.values_mut() {
            t.values.iter_mut().for_each(|v| *v *= 0.5);
        }
        copy.restore(&shifted).unwrap();
        assert_ne!(actor.snapshot().unwrap(), copy.snapshot().unwrap());
    }
}
