use super::{mlp, Activation};
use tch::{nn, Tensor};

/// State-value network V(s), one scalar output per observation.
pub struct ValueEstimator {
    seq: nn::Sequential,
}

impl ValueEstimator {
    pub fn new(path: &nn::Path, input_size: i64, layer_sizes: &[i64], activation: Activation) -> Self {
        Self {
            seq: mlp(path, input_size, 1, layer_sizes, activation),
        }
    }

    /// `(B, obs) -> (B)` values, attached to the graph.
    pub fn forward(&self, obs: &Tensor) -> Tensor {
        obs.apply(&self.seq).squeeze_dim(-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{kind::FLOAT_CPU, Device};

    #[test]
    fn forward_squeezes_the_value_column() {
        let vs = nn::VarStore::new(Device::Cpu);
        let critic = ValueEstimator::new(&vs.root(), 6, &[16, 16], Activation::Relu);
        let values = critic.forward(&Tensor::zeros([7, 6], FLOAT_CPU));
        assert_eq!(values.size(), [7]);
    }
}
