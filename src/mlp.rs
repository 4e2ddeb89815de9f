use std::collections::BTreeMap;

use candle_core::{DType, Tensor};
use candle_nn::{Linear, Module, Optimizer, VarBuilder, VarMap, linear};
use candle_optimisers::adam::{Adam, ParamsAdam};
use serde::{Deserialize, Serialize};

use crate::{
    device::DEVICE,
    error::{AgentError, Result},
};

/// One named parameter tensor, flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// Every variable of a network keyed by its `VarMap` name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightSnapshot {
    pub tensors: BTreeMap<String, NamedTensor>,
}

impl WeightSnapshot {
    /// `tau * local + (1 - tau) * target` for every tensor.
    pub fn blend(local: &WeightSnapshot, target: &WeightSnapshot, tau: f32) -> Result<Self> {
        if local.tensors.len() != target.tensors.len() {
            return Err(AgentError::shape(format!(
                "snapshots hold {} and {} tensors",
                local.tensors.len(),
                target.tensors.len()
            )));
        }
        let mut tensors = BTreeMap::new();
        for (name, l) in local.tensors.iter() {
            let t = target
                .tensors
                .get(name)
                .ok_or_else(|| AgentError::shape(format!("missing tensor {name}")))?;
            if l.shape != t.shape {
                return Err(AgentError::shape(format!(
                    "tensor {name}: {:?} vs {:?}",
                    l.shape, t.shape
                )));
            }
            let values = l
                .values
                .iter()
                .zip(t.values.iter())
                .map(|(lv, tv)| tau * lv + (1.0 - tau) * tv)
                .collect();
            tensors.insert(
                name.clone(),
                NamedTensor {
                    shape: l.shape.clone(),
                    values,
                },
            );
        }
        Ok(Self { tensors })
    }
}

/// Feed-forward network: ReLU hidden layers and a `tanh` head.
pub struct MultiLayerPerceptron {
    pub layers: Vec<Linear>,
    pub var_map: VarMap,
    pub topology: Vec<usize>,
    pub optimiser: Adam,
    learning_rate: f64,
}

impl MultiLayerPerceptron {
    pub fn new(topology: &[usize], learning_rate: f64) -> Result<Self> {
        if topology.len() < 2 || topology.contains(&0) {
            return Err(AgentError::config(format!(
                "invalid network topology {topology:?}"
            )));
        }
        let vm = VarMap::new();
        let vb = VarBuilder::from_varmap(&vm, DType::F32, &DEVICE);
        let mut layers: Vec<Linear> = Vec::with_capacity(topology.len() - 1);

        for i in 0..(topology.len() - 1) {
            layers.push(linear(topology[i], topology[i + 1], vb.pp(i))?);
        }

        let adam = Adam::new(
            vm.all_vars(),
            ParamsAdam {
                lr: learning_rate,
                ..Default::default()
            },
        )?;

        Ok(Self {
            layers,
            topology: topology.to_vec(),
            var_map: vm,
            optimiser: adam,
            learning_rate,
        })
    }

    pub fn output(&self, inputs: &Tensor) -> Result<Tensor> {
        let mut x = inputs.clone();
        for layer in self.layers.iter().take(self.layers.len() - 1) {
            x = layer.forward(&x)?;
            x = x.relu()?;
        }
        if let Some(last_layer) = self.layers.last() {
            x = last_layer.forward(&x)?.tanh()?;
        }
        Ok(x)
    }

    pub fn snapshot(&self) -> Result<WeightSnapshot> {
        let vars = self.var_map.data().lock().map_err(|_| AgentError::Lock)?;
        let mut tensors = BTreeMap::new();
        for (name, var) in vars.iter() {
            let tensor = var.as_tensor().detach();
            tensors.insert(
                name.clone(),
                NamedTensor {
                    shape: tensor.dims().to_vec(),
                    values: tensor.flatten_all()?.to_vec1::<f32>()?,
                },
            );
        }
        Ok(WeightSnapshot { tensors })
    }

    /// Writes the snapshot into the existing variables; names and shapes must match.
    pub fn restore(&self, snapshot: &WeightSnapshot) -> Result<()> {
        let vars = self.var_map.data().lock().map_err(|_| AgentError::Lock)?;
        if vars.len() != snapshot.tensors.len() {
            return Err(AgentError::shape(format!(
                "network has {} variables, snapshot has {}",
                vars.len(),
                snapshot.tensors.len()
            )));
        }
        for (name, var) in vars.iter() {
            let named = snapshot
                .tensors
                .get(name)
                .ok_or_else(|| AgentError::shape(format!("snapshot is missing {name}")))?;
            if named.shape.as_slice() != var.as_tensor().dims() {
                return Err(AgentError::shape(format!(
                    "variable {name}: network {:?} vs snapshot {:?}",
                    var.as_tensor().dims(),
                    named.shape
                )));
            }
            let tensor = Tensor::from_slice(&named.values, named.shape.as_slice(), &DEVICE)?;
            var.set(&tensor)?;
        }
        Ok(())
    }

    /// Independent network with the same topology and a copy of every weight.
    pub fn try_clone(&self) -> Result<Self> {
        let new_mlp = MultiLayerPerceptron::new(&self.topology, self.learning_rate)?;
        new_mlp.restore(&self.snapshot()?)?;
        Ok(new_mlp)
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        self.optimiser.backward_step(loss)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_copies_weights_but_not_storage() {
        let mlp = MultiLayerPerceptron::new(&[3, 8, 2], 1e-3).unwrap();
        let copy = mlp.try_clone().unwrap();
        assert_eq!(mlp.snapshot().unwrap(), copy.snapshot().unwrap());

        let mut shifted = copy.snapshot().unwrap();
        for t in shifted.tensors.values_mut() {
            t.values.iter_mut().for_each(|v| *v += 1.0);
        }
        copy.restore(&shifted).unwrap();
        assert_ne!(mlp.snapshot().unwrap(), copy.snapshot().unwrap());
    }

    #[test]
    fn head_is_bounded() {
        let mlp = MultiLayerPerceptron::new(&[2, 16, 3], 1e-3).unwrap();
        let input = Tensor::from_slice(&[100.0f32, -100.0, 5.0, 7.0], (2, 2), &DEVICE).unwrap();
        let out = mlp.output(&input).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().flatten().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn restore_rejects_foreign_snapshot() {
        let a = MultiLayerPerceptron::new(&[2, 4, 1], 1e-3).unwrap();
        let b = MultiLayerPerceptron::new(&[3, 4, 1], 1e-3).unwrap();
        assert!(matches!(
            a.restore(&b.snapshot().unwrap()),
            Err(AgentError::Shape(_))
        ));
    }

    #[test]
    fn blend_interpolates() {
        let mut local = WeightSnapshot::default();
        let mut target = WeightSnapshot::default();
        local.tensors.insert(
            "w".into(),
            NamedTensor {
                shape: vec![2],
                values: vec![1.0, 2.0],
            },
        );
        target.tensors.insert(
            "w".into(),
            NamedTensor {
                shape: vec![2],
                values: vec![3.0, 6.0],
            },
        );
        let blended = WeightSnapshot::blend(&local, &target, 0.25).unwrap();
        assert_eq!(blended.tensors["w"].values, vec![2.5, 5.0]);
    }
}
