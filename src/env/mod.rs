mod chain;

pub use chain::{ChainConfig, ChainEnv};

use tch::Tensor;

/// Action space of a vectorized environment, used to pick and size the policy
/// head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSpace {
    /// `n` mutually exclusive actions per environment.
    Discrete(i64),
    /// A real-valued action vector of the given dimension per environment.
    Continuous(i64),
}

/// One transition for every environment lane.
///
/// `obs` is the observation *after* the step, with lanes that finished this
/// step already reset to a fresh episode. `done` is 1 on those lanes, so the
/// episode boundary stays visible to the losses.
pub struct EnvStep {
    pub obs: Tensor,
    pub reward: Tensor,
    pub done: Tensor,
}

/// A batch of environments stepped in lockstep, one instance per particle.
///
/// The trainer only ever calls `reset` once and then `step` repeatedly;
/// implementations are expected to auto-reset finished lanes. Tensors are
/// produced on the CPU and moved to the training device by the caller.
pub trait VecEnv {
    fn num_envs(&self) -> usize;

    fn obs_size(&self) -> usize;

    fn action_space(&self) -> ActionSpace;

    /// Start every lane on a fresh episode and return the `(B, obs)` batch of
    /// initial observations.
    fn reset(&mut self) -> Tensor;

    /// Apply one action per lane. For discrete spaces `actions` is a `(B,)`
    /// int64 tensor, for continuous ones a `(B, act)` float tensor.
    fn step(&mut self, actions: &Tensor) -> EnvStep;
}
