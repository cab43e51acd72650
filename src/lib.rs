mod env;
mod error;
mod render;
mod rollout;
mod svpg;
mod util;

pub use env::{ActionSpace, ChainConfig, ChainEnv, EnvStep, VecEnv};
pub use error::SvpgError;
pub use render::{PortraitSpec, value_portrait};
pub use rollout::{Rollout, RolloutBatch, RolloutStep};
pub use svpg::{
    Activation, Annealing, PolicyKind, a2c, kernel,
    particle::Particle,
    policy::{DiscretePolicy, GaussianPolicy, Policy, PolicyStep},
    svpg_learner::{SvpgConfig, SvpgLearner},
    value_est::ValueEstimator,
};
pub use tch;
pub use util::{AvgTracker, Report, Reportable};

use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tch::{Device, Kind, Tensor};
use tensorboard_rs::summary_writer::SummaryWriter;

fn default_device() -> Device {
    Device::cuda_if_available()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Ensemble size; 1 degenerates to plain independent A2C.
    pub n_particles: usize,
    /// Environments stepped in lockstep per particle.
    pub n_envs: usize,
    /// Steps per rollout segment, the unit of one inner iteration.
    pub rollout_len: usize,
    /// Per-particle sample budget per epoch; inner iterations run until it
    /// is spent.
    pub n_samples: usize,
    pub max_epochs: usize,
    pub random_seed: i64,
    /// Particle var stores are saved here after training.
    /// Set empty to disable saving.
    pub checkpoint_save_folder: PathBuf,
    /// Per-epoch scalars are exported here for tensorboard.
    /// Set empty to disable.
    pub tensorboard_folder: PathBuf,
    #[serde(skip, default = "default_device")]
    pub device: Device,
    pub svpg: SvpgConfig,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            n_particles: 4,
            n_envs: 8,
            rollout_len: 16,
            n_samples: 1024,
            max_epochs: 100,
            random_seed: 123,
            checkpoint_save_folder: PathBuf::new(),
            tensorboard_folder: PathBuf::new(),
            device: default_device(),
            svpg: SvpgConfig::default(),
        }
    }
}

impl LearnerConfig {
    pub fn validate(&self) -> Result<(), SvpgError> {
        if self.n_particles < 1 {
            return Err(SvpgError::InvalidConfig(
                "at least one particle is required".into(),
            ));
        }
        if self.n_envs < 1 {
            return Err(SvpgError::InvalidConfig(
                "at least one environment per particle is required".into(),
            ));
        }
        if self.rollout_len < 2 {
            return Err(SvpgError::InvalidConfig(
                "rollout_len must be at least 2, the TD target needs a bootstrap step".into(),
            ));
        }
        if self.n_samples < 1 {
            return Err(SvpgError::InvalidConfig(
                "the per-epoch sample budget must be positive".into(),
            ));
        }
        if self.max_epochs < 1 {
            return Err(SvpgError::InvalidConfig(
                "max_epochs must be positive".into(),
            ));
        }
        self.svpg.validate()
    }
}

/// Owns the particle ensemble and one environment batch per particle, and
/// drives the epoch loop: acquire rollout segments, feed them to the SVPG
/// core, step all particles at the epoch barrier, report.
pub struct Learner<E: VecEnv> {
    config: LearnerConfig,
    envs: Vec<E>,
    svpg: SvpgLearner,
    /// Latest observation per particle, `(B, obs)` on the training device.
    obs: Vec<Tensor>,
    /// Running episodic return per env lane, carried across segments and
    /// zeroed after a terminal step.
    cumulated: Vec<Tensor>,
    writer: Option<SummaryWriter>,
    epoch: usize,
    total_samples: u64,
}

impl<E: VecEnv> Learner<E> {
    pub fn new<F>(create_env_fn: F, config: LearnerConfig) -> Result<Self, SvpgError>
    where
        F: Fn() -> E,
    {
        config.validate()?;
        tch::manual_seed(config.random_seed);

        let mut envs: Vec<E> = (0..config.n_particles).map(|_| create_env_fn()).collect();
        if envs[0].num_envs() != config.n_envs {
            return Err(SvpgError::InvalidConfig(format!(
                "environment provides {} lanes but n_envs is {}",
                envs[0].num_envs(),
                config.n_envs
            )));
        }
        let obs_size = envs[0].obs_size() as i64;
        let action_space = envs[0].action_space();

        let svpg = SvpgLearner::new(
            config.svpg.clone(),
            config.n_particles,
            obs_size,
            action_space,
            config.device,
        )?;

        let obs = envs
            .iter_mut()
            .map(|env| env.reset().to_device(config.device))
            .collect();
        let cumulated = (0..config.n_particles)
            .map(|_| Tensor::zeros([config.n_envs as i64], (Kind::Float, config.device)))
            .collect();

        let writer = if config.tensorboard_folder.as_os_str().is_empty() {
            None
        } else {
            Some(SummaryWriter::new(&config.tensorboard_folder))
        };

        info!(
            "created {} particles ({} policy parameters each) on {:?}",
            config.n_particles,
            svpg.particles()[0].policy_param_count(),
            config.device
        );

        Ok(Self {
            config,
            envs,
            svpg,
            obs,
            cumulated,
            writer,
            epoch: 0,
            total_samples: 0,
        })
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    pub fn svpg(&self) -> &SvpgLearner {
        &self.svpg
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// ACQUIRE: run every particle's policy and critic over its environment
    /// batch for one segment. The log-prob, entropy and value tensors stay on
    /// the particle's graph; actions are detached before they reach the env.
    fn acquire(&mut self) -> Vec<RolloutBatch> {
        let device = self.config.device;
        let mut batches = Vec::with_capacity(self.config.n_particles);

        for (pid, env) in self.envs.iter_mut().enumerate() {
            let particle = &self.svpg.particles()[pid];
            let mut rollout = Rollout::with_capacity(self.config.rollout_len);

            for _ in 0..self.config.rollout_len {
                let obs = self.obs[pid].shallow_clone();
                let policy_step = particle.policy.step(&obs);
                let critic = particle.critic.forward(&obs);

                let env_step = env.step(&policy_step.action.to_device(Device::Cpu));
                let reward = env_step.reward.to_device(device);
                let done = env_step.done.to_device(device);

                let cumulated = &self.cumulated[pid] + &reward;
                self.cumulated[pid] = &cumulated * (1.0 - &done);

                rollout.push_step(RolloutStep {
                    obs,
                    action: policy_step.action,
                    reward,
                    done,
                    action_logprobs: policy_step.action_logprobs,
                    entropy: policy_step.entropy,
                    critic,
                    cumulated_reward: cumulated,
                });

                self.obs[pid] = env_step.obs.to_device(device);
            }

            batches.push(rollout.stack());
        }

        batches
    }

    /// One full epoch of the SVPG state machine. Returns the epoch's metrics.
    pub fn run_epoch(&mut self) -> Result<Report, SvpgError> {
        let mut report = Report::default();
        let anneal = self
            .config
            .svpg
            .annealing
            .factor(self.epoch, self.config.max_epochs);

        let mut collected = 0;
        while collected < self.config.n_samples {
            let batches = self.acquire();
            self.svpg.accumulate(&batches, anneal, &mut report)?;
            collected += self.config.rollout_len * self.config.n_envs;
        }

        self.svpg.step_particles(&mut report)?;

        report["Samples this epoch"] = collected.into();
        report["Annealing factor"] = anneal.into();
        self.total_samples += collected as u64;

        if let Some(writer) = &mut self.writer {
            for (key, value) in report.iter() {
                writer.add_scalar(key, value.value() as f32, self.epoch);
            }
            writer.flush();
        }

        self.epoch += 1;
        Ok(report)
    }

    pub fn learn(&mut self) -> Result<(), SvpgError> {
        info!(
            "training {} particles for {} epochs, {} samples per epoch",
            self.config.n_particles, self.config.max_epochs, self.config.n_samples
        );

        for _ in 0..self.config.max_epochs {
            let report = self.run_epoch()?;
            println!("Epoch {}/{}", self.epoch, self.config.max_epochs);
            println!("{report}");
        }

        if !self.config.checkpoint_save_folder.as_os_str().is_empty() {
            let folder = self.config.checkpoint_save_folder.clone();
            self.save(&folder)?;
            info!("saved particles to {folder:?}");
        }

        Ok(())
    }

    /// Save every particle's var store under `folder`.
    pub fn save<P: AsRef<Path>>(&self, folder: P) -> Result<(), SvpgError> {
        std::fs::create_dir_all(&folder)?;
        for (pid, particle) in self.svpg.particles().iter().enumerate() {
            particle.save(folder.as_ref().join(format!("particle_{pid}.pt.tch")))?;
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(&mut self, folder: P) -> Result<(), SvpgError> {
        for (pid, particle) in self.svpg.particles_mut().iter_mut().enumerate() {
            particle.load(folder.as_ref().join(format!("particle_{pid}.pt.tch")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> LearnerConfig {
        LearnerConfig {
            n_particles: 2,
            n_envs: 2,
            rollout_len: 4,
            n_samples: 8,
            max_epochs: 2,
            device: Device::Cpu,
            ..Default::default()
        }
    }

    #[test]
    fn config_rejects_zero_particles() {
        let config = LearnerConfig {
            n_particles: 0,
            ..base_config()
        };
        assert!(matches!(config.validate(), Err(SvpgError::InvalidConfig(_))));
    }

    #[test]
    fn config_rejects_non_positive_budgets() {
        let config = LearnerConfig {
            n_samples: 0,
            ..base_config()
        };
        assert!(config.validate().is_err());

        let config = LearnerConfig {
            max_epochs: 0,
            ..base_config()
        };
        assert!(config.validate().is_err());

        let config = LearnerConfig {
            rollout_len: 1,
            ..base_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn learner_rejects_env_lane_mismatch() {
        let config = LearnerConfig {
            n_envs: 3,
            ..base_config()
        };
        let result = Learner::new(
            || {
                ChainEnv::new(ChainConfig {
                    n_envs: 2,
                    ..Default::default()
                })
            },
            config,
        );
        assert!(matches!(result, Err(SvpgError::InvalidConfig(_))));
    }
}
