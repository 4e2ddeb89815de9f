use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Enumerated edges of a Boltzmann-style coupling graph.
///
/// Decided once at construction; every weight vector built on a layout is
/// indexed by edge position, so two weight sets with the same layout always
/// have the same keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouplingLayout {
    n_visible: usize,
    n_hidden: usize,
    /// `(hidden, hidden)` pairs.
    hidden_hidden: Vec<(usize, usize)>,
    /// `(visible, hidden)` pairs.
    visible_hidden: Vec<(usize, usize)>,
}

impl CouplingLayout {
    /// Every visible unit couples to every hidden unit; the hidden units form
    /// two equal layers coupled bipartitely.
    pub fn bipartite(n_visible: usize, n_hidden: usize) -> Result<Self> {
        if n_visible == 0 {
            return Err(AgentError::config("coupling layout needs visible units"));
        }
        if n_hidden < 2 || n_hidden % 2 != 0 {
            return Err(AgentError::config(format!(
                "number of hidden units must be even and at least 2, got {n_hidden}"
            )));
        }
        let half = n_hidden / 2;
        let hidden_hidden = (0..half)
            .flat_map(|k| (half..n_hidden).map(move |l| (k, l)))
            .collect();
        let visible_hidden = (0..n_visible)
            .flat_map(|i| (0..n_hidden).map(move |k| (i, k)))
            .collect();
        Ok(Self {
            n_visible,
            n_hidden,
            hidden_hidden,
            visible_hidden,
        })
    }

    pub fn n_visible(&self) -> usize {
        self.n_visible
    }

    pub fn n_hidden(&self) -> usize {
        self.n_hidden
    }

    pub fn hidden_hidden(&self) -> &[(usize, usize)] {
        &self.hidden_hidden
    }

    pub fn visible_hidden(&self) -> &[(usize, usize)] {
        &self.visible_hidden
    }
}

/// Hidden-hidden and visible-hidden coupling coefficients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticWeights {
    layout: Arc<CouplingLayout>,
    hidden_hidden: Vec<f32>,
    visible_hidden: Vec<f32>,
}

impl CriticWeights {
    pub fn zeros(layout: Arc<CouplingLayout>) -> Self {
        Self {
            hidden_hidden: vec![0.0; layout.hidden_hidden.len()],
            visible_hidden: vec![0.0; layout.visible_hidden.len()],
            layout,
        }
    }

    /// Uniform initialisation in `[-scale, scale]`.
    pub fn random<R: Rng + ?Sized>(layout: Arc<CouplingLayout>, scale: f32, rng: &mut R) -> Self {
        let mut draw = |n: usize| -> Vec<f32> {
            (0..n)
                .map(|_| {
                    if scale > 0.0 {
                        rng.random_range(-scale..=scale)
                    } else {
                        0.0
                    }
                })
                .collect()
        };
        let hidden_hidden = draw(layout.hidden_hidden.len());
        let visible_hidden = draw(layout.visible_hidden.len());
        Self {
            layout,
            hidden_hidden,
            visible_hidden,
        }
    }

    pub fn layout(&self) -> &CouplingLayout {
        &self.layout
    }

    pub fn same_layout(&self, other: &CriticWeights) -> bool {
        Arc::ptr_eq(&self.layout, &other.layout) || self.layout == other.layout
    }

    pub fn hidden_hidden(&self) -> &[f32] {
        &self.hidden_hidden
    }

    pub fn visible_hidden(&self) -> &[f32] {
        &self.visible_hidden
    }

    pub fn hidden_hidden_mut(&mut self) -> &mut [f32] {
        &mut self.hidden_hidden
    }

    pub fn visible_hidden_mut(&mut self) -> &mut [f32] {
        &mut self.visible_hidden
    }

    /// Overwrites every coefficient with `other`'s, keeping this layout.
    pub fn copy_from(&mut self, other: &CriticWeights) -> Result<()> {
        self.check_layout(other)?;
        self.hidden_hidden.copy_from_slice(&other.hidden_hidden);
        self.visible_hidden.copy_from_slice(&other.visible_hidden);
        Ok(())
    }

    /// `self ← tau * local + (1 - tau) * self`, edge by edge.
    pub fn blend_from(&mut self, local: &CriticWeights, tau: f32) -> Result<()> {
        self.check_layout(local)?;
        for (target, source) in self
            .hidden_hidden
            .iter_mut()
            .zip(local.hidden_hidden.iter())
            .chain(self.visible_hidden.iter_mut().zip(local.visible_hidden.iter()))
        {
            *target = tau * source + (1.0 - tau) * *target;
        }
        Ok(())
    }

    fn check_layout(&self, other: &CriticWeights) -> Result<()> {
        if !self.same_layout(other) {
            return Err(AgentError::shape(format!(
                "critic coupling layouts differ: {} visible / {} hidden vs {} visible / {} hidden",
                self.layout.n_visible,
                self.layout.n_hidden,
                other.layout.n_visible,
                other.layout.n_hidden
            )));
        }
        // Deserialized weights carry their own vectors; guard against truncated files.
        if self.hidden_hidden.len() != other.hidden_hidden.len()
            || self.visible_hidden.len() != other.visible_hidden.len()
        {
            return Err(AgentError::shape("critic weight vectors have inconsistent lengths"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn bipartite_layout_enumerates_all_edges() {
        let layout = CouplingLayout::bipartite(3, 4).unwrap();
        assert_eq!(layout.hidden_hidden().len(), 4);
        assert_eq!(layout.visible_hidden().len(), 12);
        assert!(layout.hidden_hidden().iter().all(|(k, l)| *k < 2 && *l >= 2));
    }

    #[test]
    fn odd_hidden_count_is_rejected() {
        assert!(CouplingLayout::bipartite(3, 5).is_err());
        assert!(CouplingLayout::bipartite(0, 4).is_err());
    }

    #[test]
    fn blend_rejects_foreign_layouts() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = Arc::new(CouplingLayout::bipartite(2, 4).unwrap());
        let b = Arc::new(CouplingLayout::bipartite(3, 4).unwrap());
        let mut target = CriticWeights::random(a, 0.1, &mut rng);
        let local = CriticWeights::random(b, 0.1, &mut rng);
        assert!(matches!(
            target.blend_from(&local, 0.5),
            Err(AgentError::Shape(_))
        ));
    }

    #[test]
    fn blend_halfway_averages() {
        let layout = Arc::new(CouplingLayout::bipartite(1, 2).unwrap());
        let mut target = CriticWeights::zeros(layout.clone());
        let mut local = CriticWeights::zeros(layout);
        local.hidden_hidden_mut()[0] = 2.0;
        local.visible_hidden_mut().fill(-4.0);
        target.blend_from(&local, 0.5).unwrap();
        assert_eq!(target.hidden_hidden(), &[1.0]);
        assert_eq!(target.visible_hidden(), &[-2.0, -2.0]);
    }
}
