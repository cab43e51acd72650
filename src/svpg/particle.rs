use super::{policy::Policy, svpg_learner::SvpgConfig, value_est::ValueEstimator};
use crate::{env::ActionSpace, error::SvpgError};
use std::path::Path;
use tch::{Device, Tensor, nn, nn::OptimizerConfig};

/// One member of the ensemble: a policy, a critic and an Adam optimizer over
/// both, plus the gradient bookkeeping the Stein coupling needs.
///
/// `policy_params` holds the policy's parameter tensors sorted by their var
/// store names. Architectures are identical across particles, so the names
/// are identical too and position `p` refers to the same weight in every
/// particle, which is what makes element-wise gradient pairing valid.
/// `coupled_grads` accumulates the per-iteration raw and kernel-weighted
/// policy gradients until the epoch's single optimizer step folds them in.
pub struct Particle {
    vs: nn::VarStore,
    pub policy: Policy,
    pub critic: ValueEstimator,
    optimizer: nn::Optimizer,
    policy_params: Vec<Tensor>,
    coupled_grads: Vec<Tensor>,
}

impl Particle {
    pub fn new(
        config: &SvpgConfig,
        obs_size: i64,
        action_space: ActionSpace,
        device: Device,
    ) -> Result<Self, SvpgError> {
        let vs = nn::VarStore::new(device);
        let root = vs.root();

        let policy = Policy::new(
            &(&root / "policy"),
            obs_size,
            action_space,
            &config.policy_layer_sizes,
            config.activation,
        );
        let critic = ValueEstimator::new(
            &(&root / "critic"),
            obs_size,
            &config.critic_layer_sizes,
            config.activation,
        );
        let optimizer = nn::Adam::default().build(&vs, config.learning_rate)?;

        let mut named: Vec<(String, Tensor)> = vs
            .variables()
            .into_iter()
            .filter(|(name, _)| name.starts_with("policy"))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));

        let policy_params: Vec<Tensor> = named.into_iter().map(|(_, tensor)| tensor).collect();
        let coupled_grads = policy_params.iter().map(|t| t.zeros_like()).collect();

        Ok(Self {
            vs,
            policy,
            critic,
            optimizer,
            policy_params,
            coupled_grads,
        })
    }

    pub fn policy_params(&self) -> &[Tensor] {
        &self.policy_params
    }

    pub fn policy_param_count(&self) -> i64 {
        self.policy_params.iter().map(|t| t.numel() as i64).sum()
    }

    /// Flattened, ordered view of the policy parameters, attached to the
    /// graph so the kernel's repulsive term can reach them.
    pub fn flat_policy_params(&self) -> Tensor {
        let flat: Vec<Tensor> = self
            .policy_params
            .iter()
            .map(|t| t.flatten(0, -1))
            .collect();
        Tensor::cat(&flat, 0)
    }

    /// Add `weight * grads[p]` to every coupled-gradient buffer.
    pub fn accumulate_coupled(&mut self, grads: &[Tensor], weight: f64) {
        debug_assert_eq!(grads.len(), self.coupled_grads.len());
        let _guard = tch::no_grad_guard();
        for (buf, grad) in self.coupled_grads.iter_mut().zip(grads) {
            let _ = buf.f_add_(&(grad * weight)).unwrap();
        }
    }

    /// Fold the accumulated coupled gradients into `.grad`. Must run after
    /// the epoch's final backward pass has populated the gradients and
    /// before the optimizer step consumes them.
    pub fn fold_coupled_into_grads(&mut self) {
        let _guard = tch::no_grad_guard();
        for (param, buf) in self.policy_params.iter().zip(&self.coupled_grads) {
            let mut grad = param.grad();
            debug_assert!(grad.defined(), "backward pass did not reach a policy parameter");
            let _ = grad.f_add_(buf).unwrap();
        }
    }

    pub fn step(&mut self) {
        self.optimizer.step();
    }

    /// Clear `.grad` on every parameter and zero the coupling buffers, the
    /// per-epoch RESET.
    pub fn zero_grad(&mut self) {
        self.optimizer.zero_grad();
        let _guard = tch::no_grad_guard();
        for buf in &mut self.coupled_grads {
            let _ = buf.zero_();
        }
    }

    /// L2 norm over all policy-parameter gradients currently in `.grad`.
    pub fn policy_grad_norm(&self) -> f64 {
        let mut total = 0.0;
        for param in &self.policy_params {
            let grad = param.grad();
            if grad.defined() {
                total += grad.norm().double_value(&[]).powi(2);
            }
        }
        total.sqrt()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SvpgError> {
        self.vs.save(path)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), SvpgError> {
        self.vs.load(path)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn coupled_grads(&self) -> &[Tensor] {
        &self.coupled_grads
    }
}
