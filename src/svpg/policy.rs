use super::{mlp, Activation};
use crate::env::ActionSpace;
use tch::{nn, Kind, Tensor};

const LN_2PI: f64 = 1.8378770664093453;

/// Output of one stochastic policy forward over a `(B, obs)` batch.
///
/// `action` is detached (it goes to the environment); `action_logprobs` and
/// `entropy` stay on the graph so the losses can backpropagate through the
/// sampling step's distribution parameters.
pub struct PolicyStep {
    pub action: Tensor,
    pub action_logprobs: Tensor,
    pub entropy: Tensor,
}

pub enum Policy {
    Discrete(DiscretePolicy),
    Gaussian(GaussianPolicy),
}

impl Policy {
    pub fn new(
        path: &nn::Path,
        obs_size: i64,
        action_space: ActionSpace,
        layer_sizes: &[i64],
        activation: Activation,
    ) -> Self {
        match action_space {
            ActionSpace::Discrete(n) => {
                Policy::Discrete(DiscretePolicy::new(path, obs_size, n, layer_sizes, activation))
            }
            ActionSpace::Continuous(dim) => {
                Policy::Gaussian(GaussianPolicy::new(path, obs_size, dim, layer_sizes, activation))
            }
        }
    }

    pub fn step(&self, obs: &Tensor) -> PolicyStep {
        match self {
            Policy::Discrete(policy) => policy.step(obs),
            Policy::Gaussian(policy) => policy.step(obs),
        }
    }
}

/// Categorical policy over a fixed action set.
pub struct DiscretePolicy {
    seq: nn::Sequential,
}

impl DiscretePolicy {
    /// Min probability that an action will be taken, keeps log() finite.
    pub const ACTION_MIN_PROB: f64 = 1e-11;

    pub fn new(
        path: &nn::Path,
        input_size: i64,
        n_actions: i64,
        layer_sizes: &[i64],
        activation: Activation,
    ) -> Self {
        let seq = mlp(path, input_size, n_actions, layer_sizes, activation)
            .add_fn(|xs| xs.softmax(-1, Kind::Float));
        Self { seq }
    }

    fn action_probs(&self, obs: &Tensor) -> Tensor {
        obs.apply(&self.seq).clamp(Self::ACTION_MIN_PROB, 1.0)
    }

    pub fn step(&self, obs: &Tensor) -> PolicyStep {
        let probs = self.action_probs(obs);
        let log_probs = probs.log();

        let action = probs.detach().multinomial(1, true);
        let action_logprobs = log_probs.gather(-1, &action, false).squeeze_dim(-1);
        let entropy = -(&log_probs * &probs).sum_dim_intlist(Some([-1i64].as_slice()), false, Kind::Float);

        PolicyStep {
            action: action.squeeze_dim(-1),
            action_logprobs,
            entropy,
        }
    }
}

/// Diagonal Gaussian policy: an MLP mean head plus a learned,
/// state-independent log standard deviation per action dimension.
pub struct GaussianPolicy {
    seq: nn::Sequential,
    log_std: Tensor,
}

impl GaussianPolicy {
    pub fn new(
        path: &nn::Path,
        input_size: i64,
        action_dim: i64,
        layer_sizes: &[i64],
        activation: Activation,
    ) -> Self {
        Self {
            seq: mlp(path, input_size, action_dim, layer_sizes, activation),
            log_std: path.var("log_std", &[action_dim], nn::Init::Const(0.0)),
        }
    }

    pub fn step(&self, obs: &Tensor) -> PolicyStep {
        let batch = obs.size()[0];
        let mean = obs.apply(&self.seq);
        let std = self.log_std.exp();

        let action = (&mean + &std * mean.randn_like()).detach();

        let z = (&action - &mean) / &std;
        let action_logprobs = (z.square() * -0.5 - &self.log_std - 0.5 * LN_2PI)
            .sum_dim_intlist(Some([-1i64].as_slice()), false, Kind::Float);

        // entropy of a diagonal Gaussian does not depend on the state
        let entropy = (&self.log_std + 0.5 * (1.0 + LN_2PI))
            .sum(Kind::Float)
            .broadcast_to([batch]);

        PolicyStep {
            action,
            action_logprobs,
            entropy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{kind::FLOAT_CPU, Device};

    #[test]
    fn discrete_step_shapes_and_bounds() {
        let vs = nn::VarStore::new(Device::Cpu);
        let policy = DiscretePolicy::new(&vs.root(), 4, 3, &[8], Activation::Relu);
        let step = policy.step(&Tensor::zeros([5, 4], FLOAT_CPU));

        assert_eq!(step.action.size(), [5]);
        assert_eq!(step.action_logprobs.size(), [5]);
        assert_eq!(step.entropy.size(), [5]);

        let actions = Vec::<i64>::try_from(step.action).unwrap();
        assert!(actions.iter().all(|&a| (0..3).contains(&a)));

        // categorical entropy over 3 actions is at most ln(3)
        let max_ent = step.entropy.max().double_value(&[]);
        assert!(max_ent <= 3f64.ln() + 1e-6);
    }

    #[test]
    fn discrete_logprobs_carry_gradient() {
        let vs = nn::VarStore::new(Device::Cpu);
        let policy = DiscretePolicy::new(&vs.root(), 4, 2, &[8], Activation::Tanh);
        let step = policy.step(&Tensor::ones([3, 4], FLOAT_CPU));
        assert!(step.action_logprobs.requires_grad());
        assert!(step.entropy.requires_grad());
        assert!(!step.action.requires_grad());
    }

    #[test]
    fn gaussian_step_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let policy = GaussianPolicy::new(&vs.root(), 4, 2, &[8], Activation::Tanh);
        let step = policy.step(&Tensor::zeros([6, 4], FLOAT_CPU));

        assert_eq!(step.action.size(), [6, 2]);
        assert_eq!(step.action_logprobs.size(), [6]);
        assert_eq!(step.entropy.size(), [6]);
        assert!(step.action_logprobs.requires_grad());
    }

    #[test]
    fn gaussian_entropy_grows_with_log_std() {
        let vs = nn::VarStore::new(Device::Cpu);
        let policy = GaussianPolicy::new(&vs.root(), 3, 2, &[4], Activation::Tanh);
        let base = policy
            .step(&Tensor::zeros([1, 3], FLOAT_CPU))
            .entropy
            .double_value(&[0]);

        let _ = tch::no_grad(|| policy.log_std.shallow_clone().fill_(1.0));
        let wider = policy
            .step(&Tensor::zeros([1, 3], FLOAT_CPU))
            .entropy
            .double_value(&[0]);
        assert!(wider > base);
    }
}
