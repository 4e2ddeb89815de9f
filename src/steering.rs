use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    env::{BoxSpace, Environment, Step},
    error::Result,
};

const KICK_GAIN: f32 = 0.5;
const SUCCESS_THRESHOLD: f32 = 0.05;

/// Steer a beam position onto a target with bounded corrector kicks.
///
/// Observation is `[position, target]`, both in `[-1, 1]`; the action is one
/// kick in `[-1, 1]` moving the beam by `0.5 * kick`. The reward is the
/// negative distance to the target, and an episode ends once the beam is
/// within `0.05` of it or after `max_steps`.
pub struct TargetSteering {
    position: f32,
    target: f32,
    steps: usize,
    max_steps: usize,
    action_space: BoxSpace,
    observation_space: BoxSpace,
    rng: StdRng,
}

impl TargetSteering {
    pub fn new(max_steps: usize, seed: Option<u64>) -> Result<Self> {
        Ok(Self {
            position: 0.0,
            target: 0.0,
            steps: 0,
            max_steps,
            action_space: BoxSpace::uniform(1, -1.0, 1.0)?,
            observation_space: BoxSpace::uniform(2, -1.0, 1.0)?,
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            },
        })
    }

    fn observation(&self) -> Vec<f32> {
        vec![self.position, self.target]
    }

    pub fn distance(&self) -> f32 {
        (self.position - self.target).abs()
    }
}

impl Environment for TargetSteering {
    fn reset(&mut self) -> Vec<f32> {
        self.position = self.rng.random_range(-1.0..=1.0);
        self.target = self.rng.random_range(-0.8..=0.8);
        self.steps = 0;
        self.observation()
    }

    fn step(&mut self, action: &[f32]) -> Step {
        let mut kick = [action.first().copied().unwrap_or(0.0)];
        self.action_space.clip(&mut kick);
        let kick = kick[0];
        self.position = (self.position + KICK_GAIN * kick).clamp(-1.0, 1.0);
        self.steps += 1;
        let distance = self.distance();
        Step {
            next_state: self.observation(),
            reward: -distance,
            done: distance < SUCCESS_THRESHOLD || self.steps >= self.max_steps,
        }
    }

    fn action_space(&self) -> &BoxSpace {
        &self.action_space
    }

    fn observation_space(&self) -> &BoxSpace {
        &self.observation_space
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kick_moves_beam_towards_target() {
        let mut env = TargetSteering::new(10, Some(3)).unwrap();
        let state = env.reset();
        assert!(env.observation_space().contains(&state));
        let direction = (state[1] - state[0]).signum();
        let before = env.distance();
        let step = env.step(&[direction * 0.1]);
        assert!(env.distance() < before || step.done);
        assert_eq!(step.reward, -env.distance());
    }

    #[test]
    fn oversized_kick_is_clipped_to_action_bounds() {
        let mut env = TargetSteering::new(10, Some(8)).unwrap();
        let mut twin = TargetSteering::new(10, Some(8)).unwrap();
        env.reset();
        twin.reset();
        let clipped = env.step(&[7.5]);
        let bounded = twin.step(&[1.0]);
        assert_eq!(clipped.next_state, bounded.next_state);
        assert_eq!(clipped.reward, bounded.reward);
    }

    #[test]
    fn episode_ends_after_max_steps() {
        let mut env = TargetSteering::new(3, Some(1)).unwrap();
        env.reset();
        let mut done = false;
        for _ in 0..3 {
            done = env.step(&[0.0]).done;
        }
        assert!(done);
    }
}
