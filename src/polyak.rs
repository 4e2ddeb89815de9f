//! Soft (Polyak) updates of the target critic and target actor.

use crate::{
    actor::Actor,
    critic::Critic,
    error::{AgentError, Result},
    mlp::WeightSnapshot,
};

pub fn check_tau(tau: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&tau) {
        return Err(AgentError::config(format!(
            "soft update rate must lie in [0, 1], got {tau}"
        )));
    }
    Ok(())
}

/// `target ← tau * local + (1 - tau) * target` over every coupling.
pub fn soft_update_critic<C: Critic>(target: &mut C, local: &C, tau: f32) -> Result<()> {
    check_tau(tau)?;
    target.weights_mut().blend_from(local.weights(), tau)
}

/// Same blend over the actor's full parameter snapshot.
pub fn soft_update_actor<A: Actor>(target: &mut A, local: &A, tau: f32) -> Result<()> {
    check_tau(tau)?;
    let blended = WeightSnapshot::blend(&local.snapshot()?, &target.snapshot()?, tau)?;
    target.restore(&blended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        actor::MlpActor,
        critic::{BoltzmannConfig, BoltzmannCritic},
        env::BoxSpace,
    };

    fn critics() -> (BoltzmannCritic, BoltzmannCritic) {
        let space = BoxSpace::uniform(2, -1.0, 1.0).unwrap();
        let make = |seed| {
            BoltzmannCritic::new(
                &space,
                &space,
                BoltzmannConfig {
                    n_hidden: 4,
                    init_scale: 0.5,
                    seed: Some(seed),
                    ..Default::default()
                },
            )
            .unwrap()
        };
        (make(1), make(2))
    }

    fn actors() -> (MlpActor, MlpActor) {
        let space = BoxSpace::uniform(2, -1.0, 1.0).unwrap();
        let make = || MlpActor::new(&space, &space, &[8], 1e-3).unwrap();
        (make(), make())
    }

    #[test]
    fn tau_one_copies_local() {
        let (local, mut target) = critics();
        soft_update_critic(&mut target, &local, 1.0).unwrap();
        assert_eq!(target.weights().hidden_hidden(), local.weights().hidden_hidden());
        assert_eq!(target.weights().visible_hidden(), local.weights().visible_hidden());

        let (local, mut target) = actors();
        soft_update_actor(&mut target, &local, 1.0).unwrap();
        assert_eq!(target.snapshot().unwrap(), local.snapshot().unwrap());
    }

    #[test]
    fn tau_zero_is_a_no_op() {
        let (local, mut target) = critics();
        let before = target.weights().clone();
        soft_update_critic(&mut target, &local, 0.0).unwrap();
        assert_eq!(target.weights().hidden_hidden(), before.hidden_hidden());
        assert_eq!(target.weights().visible_hidden(), before.visible_hidden());

        let (local, mut target) = actors();
        let before = target.snapshot().unwrap();
        soft_update_actor(&mut target, &local, 0.0).unwrap();
        assert_eq!(target.snapshot().unwrap(), before);
    }

    #[test]
    fn out_of_range_tau_is_rejected() {
        let (local, mut target) = critics();
        assert!(soft_update_critic(&mut target, &local, 1.5).is_err());
        assert!(soft_update_critic(&mut target, &local, -0.1).is_err());
    }
}
