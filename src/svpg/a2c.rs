use crate::rollout::RolloutBatch;
use tch::{Kind, Tensor};

/// Critic loss over a time-major `(T, B)` segment.
///
/// TD target: `target_t = reward_t + gamma * critic_{t+1} * (1 - done_t)`,
/// with no gradient through the bootstrap value. Returns the mean squared TD
/// error over `t in [0, T-1)` together with the raw TD error, which the
/// policy loss reuses as its (detached) advantage signal.
pub fn critic_loss(reward: &Tensor, done: &Tensor, critic: &Tensor, gamma: f64) -> (Tensor, Tensor) {
    let t = reward.size()[0];
    debug_assert!(t >= 2, "TD target needs a bootstrap step");

    let target = reward.slice(0, 0, t - 1, 1)
        + gamma * critic.slice(0, 1, t, 1).detach() * (1.0 - done.slice(0, 0, t - 1, 1));
    let td = target - critic.slice(0, 0, t - 1, 1);

    (td.square().mean(Kind::Float), td)
}

/// Policy-gradient objective `mean(log pi(a_t|s_t) * td_t)` over the same
/// horizon as the critic loss. The TD error is detached so the critic is
/// trained only by its own loss; the caller negates for gradient descent.
pub fn policy_loss(action_logprobs: &Tensor, td: &Tensor) -> Tensor {
    let t = action_logprobs.size()[0];
    (action_logprobs.slice(0, 0, t - 1, 1) * td.detach()).mean(Kind::Float)
}

/// Mean entropy of the policy over the loss horizon, the exploration bonus.
pub fn entropy_bonus(entropy: &Tensor) -> Tensor {
    let t = entropy.size()[0];
    entropy.slice(0, 0, t - 1, 1).mean(Kind::Float)
}

/// Mean cumulated reward over the episodes that finished inside this
/// segment. `None` when no episode terminated: an empty reduction is "no
/// signal this step", never a NaN.
pub fn completed_episode_reward(batch: &RolloutBatch) -> Option<f64> {
    let finished = batch
        .cumulated_reward
        .masked_select(&batch.done.to_kind(Kind::Bool));

    if finished.numel() == 0 {
        None
    } else {
        Some(finished.mean(Kind::Float).double_value(&[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollout::{Rollout, RolloutStep};
    use tch::kind::{FLOAT_CPU, INT64_CPU};

    fn batch_with(reward: &[f32], done: &[f32], cumulated: &[f32]) -> RolloutBatch {
        let t = reward.len();
        let mut rollout = Rollout::with_capacity(t);
        for i in 0..t {
            rollout.push_step(RolloutStep {
                obs: Tensor::zeros([1, 2], FLOAT_CPU),
                action: Tensor::zeros([1], INT64_CPU),
                reward: Tensor::from_slice(&[reward[i]]),
                done: Tensor::from_slice(&[done[i]]),
                action_logprobs: Tensor::zeros([1], FLOAT_CPU),
                entropy: Tensor::zeros([1], FLOAT_CPU),
                critic: Tensor::zeros([1], FLOAT_CPU),
                cumulated_reward: Tensor::from_slice(&[cumulated[i]]),
            });
        }
        rollout.stack()
    }

    #[test]
    fn critic_loss_is_zero_on_exact_bellman_values() {
        // constant reward, no terminals, critic set to the fixed point of
        // v = r + gamma * v
        let gamma = 0.9;
        let t = 5;
        let v = 1.0 / (1.0 - gamma);

        let reward = Tensor::ones([t, 2], FLOAT_CPU);
        let done = Tensor::zeros([t, 2], FLOAT_CPU);
        let critic = Tensor::full([t, 2], v, FLOAT_CPU);

        let (loss, td) = critic_loss(&reward, &done, &critic, gamma);
        assert!(loss.double_value(&[]).abs() < 1e-10);
        assert!(td.abs().max().double_value(&[]) < 1e-5);
    }

    #[test]
    fn critic_loss_is_non_negative() {
        let reward = Tensor::from_slice(&[1.0f32, -2.0, 0.5]).view([3, 1]);
        let done = Tensor::zeros([3, 1], FLOAT_CPU);
        let critic = Tensor::from_slice(&[0.3f32, 1.7, -0.2]).view([3, 1]);

        let (loss, _) = critic_loss(&reward, &done, &critic, 0.99);
        assert!(loss.double_value(&[]) > 0.0);
    }

    #[test]
    fn done_masks_the_bootstrap_value() {
        // with done everywhere the target collapses to the raw reward
        let reward = Tensor::from_slice(&[2.0f32, 3.0]).view([2, 1]);
        let done = Tensor::ones([2, 1], FLOAT_CPU);
        let critic = Tensor::from_slice(&[2.0f32, 100.0]).view([2, 1]);

        let (loss, _) = critic_loss(&reward, &done, &critic, 0.99);
        assert!(loss.double_value(&[]).abs() < 1e-10);
    }

    #[test]
    fn policy_loss_matches_hand_computation() {
        let logprobs = Tensor::from_slice(&[-1.0f32, -2.0, -3.0]).view([3, 1]);
        let td = Tensor::from_slice(&[0.5f32, 2.0]).view([2, 1]);

        let loss = policy_loss(&logprobs, &td).double_value(&[]);
        let expected = ((-1.0 * 0.5) + (-2.0 * 2.0)) / 2.0;
        assert!((loss - expected).abs() < 1e-6);
    }

    #[test]
    fn no_completed_episode_yields_none() {
        let batch = batch_with(&[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0]);
        assert!(completed_episode_reward(&batch).is_none());
    }

    #[test]
    fn completed_episodes_average_their_returns() {
        let batch = batch_with(&[0.0, 0.0, 0.0], &[1.0, 0.0, 1.0], &[2.0, 3.0, 4.0]);
        let reward = completed_episode_reward(&batch).unwrap();
        assert!((reward - 3.0).abs() < 1e-6);
    }
}
