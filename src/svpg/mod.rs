pub mod a2c;
pub mod kernel;
pub mod particle;
pub mod policy;
pub mod svpg_learner;
pub mod value_est;

use serde::{Deserialize, Serialize};
use tch::{nn, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Tanh,
}

impl Activation {
    fn apply(self, xs: &Tensor) -> Tensor {
        match self {
            Activation::Relu => xs.relu(),
            Activation::Tanh => xs.tanh(),
        }
    }
}

/// Head architecture of the policy networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Categorical distribution over a fixed action set.
    Discrete,
    /// Diagonal Gaussian over a real-valued action vector.
    Continuous,
}

/// Schedule scaling the repulsive machinery (cross-particle gradient mixing
/// and the kernel-sum loss term) over the course of a run. Full strength
/// early buys exploration; decaying toward zero lets particles settle into
/// independent actor-critic updates late.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annealing {
    None,
    Linear,
    Power { p: f64 },
}

impl Annealing {
    pub fn factor(self, epoch: usize, max_epochs: usize) -> f64 {
        let remaining = 1.0 - epoch as f64 / max_epochs as f64;
        match self {
            Annealing::None => 1.0,
            Annealing::Linear => remaining,
            Annealing::Power { p } => remaining.powf(p),
        }
    }
}

/// Fully connected trunk shared by the policy and critic builders, hidden
/// layers numbered the way the var store names them.
fn mlp(
    path: &nn::Path,
    input_size: i64,
    output_size: i64,
    layer_sizes: &[i64],
    activation: Activation,
) -> nn::Sequential {
    assert!(!layer_sizes.is_empty(), "at least one hidden layer is required");
    let config = nn::LinearConfig::default();

    let mut seq = nn::seq()
        .add(nn::linear(path / 0, input_size, layer_sizes[0], config))
        .add_fn(move |xs| activation.apply(xs));

    let mut prev_layer_size = layer_sizes[0];
    for (i, layer_size) in layer_sizes.iter().skip(1).copied().enumerate() {
        seq = seq
            .add(nn::linear(path / (i + 1), prev_layer_size, layer_size, config))
            .add_fn(move |xs| activation.apply(xs));
        prev_layer_size = layer_size;
    }

    seq.add(nn::linear(
        path / layer_sizes.len(),
        prev_layer_size,
        output_size,
        config,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annealing_factors() {
        assert_eq!(Annealing::None.factor(7, 10), 1.0);
        assert_eq!(Annealing::Linear.factor(0, 10), 1.0);
        assert!((Annealing::Linear.factor(5, 10) - 0.5).abs() < 1e-12);
        assert!((Annealing::Power { p: 2.0 }.factor(5, 10) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn mlp_output_shape() {
        let vs = nn::VarStore::new(tch::Device::Cpu);
        let net = mlp(&vs.root(), 4, 3, &[8, 8], Activation::Tanh);
        let out = Tensor::zeros([5, 4], tch::kind::FLOAT_CPU).apply(&net);
        assert_eq!(out.size(), [5, 3]);
    }
}
