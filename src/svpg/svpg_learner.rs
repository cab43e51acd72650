use super::{Activation, Annealing, PolicyKind, a2c, kernel, particle::Particle};
use crate::{
    env::ActionSpace,
    error::SvpgError,
    rollout::RolloutBatch,
    util::{AvgTracker, Report},
};
use serde::{Deserialize, Serialize};
use tch::{Device, Kind, Tensor};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SvpgConfig {
    pub policy_layer_sizes: Vec<i64>,
    pub critic_layer_sizes: Vec<i64>,
    pub activation: Activation,
    pub policy_kind: PolicyKind,
    /// Adam learning rate shared by every particle's policy and critic.
    pub learning_rate: f64,
    /// Discount factor.
    pub gamma: f64,
    /// Entropy coefficient, the exploration bonus weight.
    pub entropy_coef: f64,
    /// Critic-loss coefficient.
    pub critic_coef: f64,
    /// SVGD temperature. `None` drops the 1/alpha factor from the policy
    /// loss; the 1/n_particles factor is always applied.
    pub alpha: Option<f64>,
    pub annealing: Annealing,
}

impl Default for SvpgConfig {
    fn default() -> Self {
        Self {
            policy_layer_sizes: vec![64, 64],
            critic_layer_sizes: vec![64, 64],
            activation: Activation::Relu,
            policy_kind: PolicyKind::Discrete,
            learning_rate: 1e-3,
            gamma: 0.99,
            entropy_coef: 0.01,
            critic_coef: 1.0,
            alpha: Some(10.0),
            annealing: Annealing::None,
        }
    }
}

impl SvpgConfig {
    pub fn validate(&self) -> Result<(), SvpgError> {
        if self.policy_layer_sizes.is_empty() || self.critic_layer_sizes.is_empty() {
            return Err(SvpgError::InvalidConfig(
                "policy and critic need at least one hidden layer".into(),
            ));
        }
        if self.learning_rate <= 0.0 {
            return Err(SvpgError::InvalidConfig(
                "learning rate must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(SvpgError::InvalidConfig(
                "discount factor must lie in [0, 1]".into(),
            ));
        }
        if self.entropy_coef < 0.0 || self.critic_coef < 0.0 {
            return Err(SvpgError::InvalidConfig(
                "loss coefficients must be non-negative".into(),
            ));
        }
        if let Some(alpha) = self.alpha {
            if alpha <= 0.0 {
                return Err(SvpgError::InvalidConfig(
                    "temperature alpha must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Stack every particle's flattened policy parameters into the `(n, d)`
/// matrix the kernel consumes, failing fast if any particle's parameter
/// count drifted from the first one's.
fn parameter_matrix(particles: &[Particle]) -> Result<Tensor, SvpgError> {
    let expected = particles[0].policy_param_count();
    for particle in &particles[1..] {
        let count = particle.policy_param_count();
        if count != expected {
            return Err(SvpgError::ParameterMismatch(expected, count));
        }
    }

    let rows: Vec<Tensor> = particles.iter().map(Particle::flat_policy_params).collect();
    Ok(Tensor::stack(&rows, 0))
}

/// The SVPG ensemble and its epoch state machine.
///
/// One epoch is: repeated `accumulate` calls (ACQUIRE happens upstream, each
/// call covers LOSS, KERNEL and GRADIENT-COUPLE for one rollout segment)
/// until the caller's sample budget is spent, then a single `step_particles`
/// (STEP + RESET). Losses other than the policy loss are summed into a
/// running scalar whose backward pass is deferred to the step, exactly one
/// optimizer step per particle per epoch.
pub struct SvpgLearner {
    particles: Vec<Particle>,
    config: SvpgConfig,
    total_loss: Option<Tensor>,
}

impl SvpgLearner {
    pub fn new(
        config: SvpgConfig,
        n_particles: usize,
        obs_size: i64,
        action_space: ActionSpace,
        device: Device,
    ) -> Result<Self, SvpgError> {
        config.validate()?;
        if n_particles < 1 {
            return Err(SvpgError::InvalidConfig(
                "at least one particle is required".into(),
            ));
        }
        let kind_matches = matches!(
            (config.policy_kind, action_space),
            (PolicyKind::Discrete, ActionSpace::Discrete(_))
                | (PolicyKind::Continuous, ActionSpace::Continuous(_))
        );
        if !kind_matches {
            return Err(SvpgError::InvalidConfig(format!(
                "policy kind {:?} does not match the environment action space {:?}",
                config.policy_kind, action_space
            )));
        }

        let particles = (0..n_particles)
            .map(|_| Particle::new(&config, obs_size, action_space, device))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            particles,
            config,
            total_loss: None,
        })
    }

    pub fn n_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn config(&self) -> &SvpgConfig {
        &self.config
    }

    /// One inner iteration: per-particle A2C losses over the given rollout
    /// segments, a fresh kernel over the live parameters, coupled policy
    /// gradients into the particles' buffers, and the deferred loss terms
    /// onto the running epoch total.
    pub fn accumulate(
        &mut self,
        batches: &[RolloutBatch],
        anneal: f64,
        report: &mut Report,
    ) -> Result<(), SvpgError> {
        let n = self.particles.len();
        assert_eq!(batches.len(), n, "one rollout segment per particle");

        let inv_n = 1.0 / n as f64;
        let policy_scale = match self.config.alpha {
            Some(alpha) => inv_n / alpha,
            None => inv_n,
        };

        // LOSS
        let mut policy_loss: Option<Tensor> = None;
        let mut critic_loss: Option<Tensor> = None;
        let mut entropy_loss: Option<Tensor> = None;

        for (pid, batch) in batches.iter().enumerate() {
            let (particle_critic_loss, td) = a2c::critic_loss(
                &batch.reward,
                &batch.done,
                &batch.critic,
                self.config.gamma,
            );
            // negated: gradient ascent on the objective is descent on the loss
            let particle_policy_loss =
                -a2c::policy_loss(&batch.action_logprobs, &td) * policy_scale;
            let particle_entropy = a2c::entropy_bonus(&batch.entropy);

            report["Critic loss"] +=
                AvgTracker::new(particle_critic_loss.double_value(&[]), 1).into();
            report["Policy loss"] +=
                AvgTracker::new(particle_policy_loss.double_value(&[]), 1).into();
            report["Entropy"] += AvgTracker::new(particle_entropy.double_value(&[]), 1).into();

            if let Some(reward) = a2c::completed_episode_reward(batch) {
                report[format!("Reward/particle {pid}").as_str()] +=
                    AvgTracker::new(reward, 1).into();
            }

            policy_loss = Some(match policy_loss {
                None => particle_policy_loss,
                Some(sum) => sum + particle_policy_loss,
            });
            critic_loss = Some(match critic_loss {
                None => particle_critic_loss,
                Some(sum) => sum + particle_critic_loss,
            });
            entropy_loss = Some(match entropy_loss {
                None => particle_entropy,
                Some(sum) => sum + particle_entropy,
            });
        }

        let policy_loss = policy_loss.expect("n_particles >= 1");
        let critic_loss = critic_loss.expect("n_particles >= 1");
        let entropy_loss = entropy_loss.expect("n_particles >= 1");

        // KERNEL, rebuilt from the live parameters every iteration
        let params = parameter_matrix(&self.particles)?;
        let kernel = kernel::rbf(&params, &params.detach());

        // GRADIENT-COUPLE
        self.couple(&policy_loss, &kernel, anneal);

        // deferred terms: critic and entropy weighted by their coefficients,
        // plus the kernel row-sums as the repulsive regularizer
        let term = critic_loss * self.config.critic_coef - entropy_loss * self.config.entropy_coef
            + kernel.sum(Kind::Float) * (anneal * inv_n);
        self.total_loss = Some(match self.total_loss.take() {
            None => term,
            Some(total) => total + term,
        });

        Ok(())
    }

    /// Backpropagate the summed policy loss to obtain this iteration's raw
    /// per-particle gradients, then accumulate into every particle `i`
    ///
    ///   raw_i + anneal * sum over j != i of K[j, i] * raw_j
    ///
    /// parameter by parameter. The raw gradients are a snapshot taken before
    /// any mixing, so the result is a plain sum over pairs and independent of
    /// iteration order. The graph is kept alive: the entropy term backwarded
    /// at the end of the epoch shares it.
    fn couple(&mut self, policy_loss: &Tensor, kernel: &Tensor, anneal: f64) {
        let n = self.particles.len();
        let per_particle = self.particles[0].policy_params().len();

        let inputs: Vec<Tensor> = self
            .particles
            .iter()
            .flat_map(|p| p.policy_params().iter().map(Tensor::shallow_clone))
            .collect();
        let raw = Tensor::run_backward(&[policy_loss], &inputs, true, false);

        let kernel = kernel.detach();
        for i in 0..n {
            self.particles[i].accumulate_coupled(&raw[i * per_particle..(i + 1) * per_particle], 1.0);

            for j in 0..n {
                if j == i {
                    continue;
                }
                let weight = kernel.double_value(&[j as i64, i as i64]);
                self.particles[i].accumulate_coupled(
                    &raw[j * per_particle..(j + 1) * per_particle],
                    weight * anneal,
                );
            }
        }
    }

    /// End-of-epoch barrier: backward the deferred loss sum, fold the coupled
    /// gradient buffers into `.grad`, then step and reset every particle in
    /// index order.
    pub fn step_particles(&mut self, report: &mut Report) -> Result<(), SvpgError> {
        let total_loss = self
            .total_loss
            .take()
            .expect("accumulate() must run before step_particles()");
        total_loss.backward();

        for particle in &mut self.particles {
            particle.fold_coupled_into_grads();
        }

        for (pid, particle) in self.particles.iter().enumerate() {
            report[format!("Grad norm/particle {pid}").as_str()] =
                particle.policy_grad_norm().into();
        }

        for particle in &mut self.particles {
            particle.step();
        }
        for particle in &mut self.particles {
            particle.zero_grad();
        }

        Ok(())
    }
}
