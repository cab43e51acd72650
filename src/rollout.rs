use tch::Tensor;

/// Everything recorded for one acquisition step across a particle's
/// environment lanes.
///
/// `critic`, `action_logprobs` and `entropy` must stay attached to the
/// particle's computation graph; the losses backpropagate through them.
/// `cumulated_reward` is the running episodic return per lane, taken *after*
/// the reward of this step was added and *before* finished lanes were zeroed.
pub struct RolloutStep {
    pub obs: Tensor,
    pub action: Tensor,
    pub reward: Tensor,
    pub done: Tensor,
    pub action_logprobs: Tensor,
    pub entropy: Tensor,
    pub critic: Tensor,
    pub cumulated_reward: Tensor,
}

/// Per-particle trajectory buffer for one rollout segment.
///
/// Append-only while acquiring; `stack` turns the per-step `(B,)` rows into
/// the time-major `(T, B)` batch the losses consume. A fresh buffer is built
/// every inner iteration, so nothing here survives an optimizer step.
#[derive(Default)]
pub struct Rollout {
    obs: Vec<Tensor>,
    action: Vec<Tensor>,
    reward: Vec<Tensor>,
    done: Vec<Tensor>,
    action_logprobs: Vec<Tensor>,
    entropy: Vec<Tensor>,
    critic: Vec<Tensor>,
    cumulated_reward: Vec<Tensor>,
}

/// Time-major `(T, B)` view of a finished rollout segment.
pub struct RolloutBatch {
    pub obs: Tensor,
    pub action: Tensor,
    pub reward: Tensor,
    pub done: Tensor,
    pub action_logprobs: Tensor,
    pub entropy: Tensor,
    pub critic: Tensor,
    pub cumulated_reward: Tensor,
}

impl Rollout {
    pub fn with_capacity(len: usize) -> Self {
        Self {
            obs: Vec::with_capacity(len),
            action: Vec::with_capacity(len),
            reward: Vec::with_capacity(len),
            done: Vec::with_capacity(len),
            action_logprobs: Vec::with_capacity(len),
            entropy: Vec::with_capacity(len),
            critic: Vec::with_capacity(len),
            cumulated_reward: Vec::with_capacity(len),
        }
    }

    pub fn len(&self) -> usize {
        self.reward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reward.is_empty()
    }

    pub fn push_step(&mut self, step: RolloutStep) {
        self.obs.push(step.obs);
        self.action.push(step.action);
        self.reward.push(step.reward);
        self.done.push(step.done);
        self.action_logprobs.push(step.action_logprobs);
        self.entropy.push(step.entropy);
        self.critic.push(step.critic);
        self.cumulated_reward.push(step.cumulated_reward);
    }

    pub fn stack(&self) -> RolloutBatch {
        assert!(!self.is_empty(), "cannot stack an empty rollout");

        RolloutBatch {
            obs: Tensor::stack(&self.obs, 0),
            action: Tensor::stack(&self.action, 0),
            reward: Tensor::stack(&self.reward, 0),
            done: Tensor::stack(&self.done, 0),
            action_logprobs: Tensor::stack(&self.action_logprobs, 0),
            entropy: Tensor::stack(&self.entropy, 0),
            critic: Tensor::stack(&self.critic, 0),
            cumulated_reward: Tensor::stack(&self.cumulated_reward, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n_envs: i64, reward: f32) -> RolloutStep {
        RolloutStep {
            obs: Tensor::zeros([n_envs, 3], tch::kind::FLOAT_CPU),
            action: Tensor::zeros([n_envs], tch::kind::INT64_CPU),
            reward: Tensor::full([n_envs], reward as f64, tch::kind::FLOAT_CPU),
            done: Tensor::zeros([n_envs], tch::kind::FLOAT_CPU),
            action_logprobs: Tensor::zeros([n_envs], tch::kind::FLOAT_CPU),
            entropy: Tensor::zeros([n_envs], tch::kind::FLOAT_CPU),
            critic: Tensor::zeros([n_envs], tch::kind::FLOAT_CPU),
            cumulated_reward: Tensor::full([n_envs], reward as f64, tch::kind::FLOAT_CPU),
        }
    }

    #[test]
    fn stack_is_time_major() {
        let mut rollout = Rollout::with_capacity(4);
        for t in 0..4 {
            rollout.push_step(step(2, t as f32));
        }
        assert_eq!(rollout.len(), 4);

        let batch = rollout.stack();
        assert_eq!(batch.reward.size(), [4, 2]);
        assert_eq!(batch.obs.size(), [4, 2, 3]);
        assert_eq!(batch.reward.double_value(&[3, 0]), 3.0);
    }

    #[test]
    #[should_panic]
    fn stacking_empty_rollout_panics() {
        Rollout::default().stack();
    }
}
