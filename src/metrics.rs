use std::{fs::File, path::Path};

use polars::{
    frame::DataFrame,
    io::SerWriter,
    prelude::{Column, CsvWriter},
};

use crate::error::Result;

/// Diagnostics of a single `train()` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainStats {
    /// Mean squared TD error over the minibatch.
    pub q_loss: f32,
    /// `-mean(Q)` of the actor's actions before its update.
    pub mu_loss: f32,
    /// Frobenius norm of the bridged `dQ/da`.
    pub gradient_norm: f32,
}

/// Per-call traces kept for the caller's monitoring.
#[derive(Debug, Clone, Default)]
pub struct TrainingLog {
    pub q_losses: Vec<f32>,
    pub mu_losses: Vec<f32>,
    pub gradient_norms: Vec<f32>,
}

impl TrainingLog {
    pub fn record(&mut self, stats: TrainStats) {
        self.q_losses.push(stats.q_loss);
        self.mu_losses.push(stats.mu_loss);
        self.gradient_norms.push(stats.gradient_norm);
    }

    pub fn len(&self) -> usize {
        self.q_losses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q_losses.is_empty()
    }

    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let steps: Vec<u32> = (0..self.len() as u32).collect();
        Ok(DataFrame::new(vec![
            Column::new("step".into(), steps),
            Column::new("q_loss".into(), self.q_losses.clone()),
            Column::new("mu_loss".into(), self.mu_losses.clone()),
            Column::new("gradient_norm".into(), self.gradient_norms.clone()),
        ])?)
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file).finish(&mut df)?;
        Ok(())
    }
}
