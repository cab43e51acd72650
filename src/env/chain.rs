use super::{ActionSpace, EnvStep, VecEnv};
use tch::{Kind, Tensor};

#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Number of states on the chain; observations are one-hot over these.
    pub n_states: usize,
    pub n_envs: usize,
    /// Episodes end after this many steps even if no terminal was reached.
    pub max_episode_steps: usize,
    /// Reward for reaching the left end of the chain (the near, small prize).
    pub left_reward: f64,
    /// Reward for reaching the right end (the far, large prize).
    pub right_reward: f64,
    /// Start each episode in a random interior state instead of the state
    /// next to the left terminal.
    pub random_start: bool,
    pub seed: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            n_states: 8,
            n_envs: 4,
            max_episode_steps: 32,
            left_reward: 0.1,
            right_reward: 1.0,
            random_start: false,
            seed: 0,
        }
    }
}

/// Deterministic chain MDP with terminal rewards at both ends.
///
/// Two actions, left and right, move by one state. The left terminal pays a
/// small reward after a short walk, the right terminal a large reward after a
/// long one, which makes policy diversity across particles observable: greedy
/// particles park at the near end while exploratory ones find the far end.
pub struct ChainEnv {
    config: ChainConfig,
    positions: Vec<usize>,
    steps: Vec<usize>,
    rng: fastrand::Rng,
}

impl ChainEnv {
    pub const ACTION_LEFT: i64 = 0;
    pub const ACTION_RIGHT: i64 = 1;

    pub fn new(config: ChainConfig) -> Self {
        assert!(config.n_states >= 3, "chain needs two terminals and an interior");
        assert!(config.n_envs >= 1);
        assert!(config.max_episode_steps >= 1);

        let rng = fastrand::Rng::with_seed(config.seed);
        let n_envs = config.n_envs;
        Self {
            config,
            positions: vec![0; n_envs],
            steps: vec![0; n_envs],
            rng,
        }
    }

    fn start_state(&mut self) -> usize {
        if self.config.random_start {
            self.rng.usize(1..self.config.n_states - 1)
        } else {
            1
        }
    }

    fn reset_lane(&mut self, lane: usize) {
        self.positions[lane] = self.start_state();
        self.steps[lane] = 0;
    }

    fn obs_tensor(&self) -> Tensor {
        let n = self.config.n_states;
        let mut one_hot = vec![0f32; self.config.n_envs * n];
        for (lane, &pos) in self.positions.iter().enumerate() {
            one_hot[lane * n + pos] = 1.0;
        }
        Tensor::from_slice(&one_hot).view([self.config.n_envs as i64, n as i64])
    }
}

impl VecEnv for ChainEnv {
    fn num_envs(&self) -> usize {
        self.config.n_envs
    }

    fn obs_size(&self) -> usize {
        self.config.n_states
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Discrete(2)
    }

    fn reset(&mut self) -> Tensor {
        for lane in 0..self.config.n_envs {
            self.reset_lane(lane);
        }
        self.obs_tensor()
    }

    fn step(&mut self, actions: &Tensor) -> EnvStep {
        debug_assert_eq!(actions.size(), [self.config.n_envs as i64]);
        let actions = Vec::<i64>::try_from(actions.to_kind(Kind::Int64)).unwrap();

        let mut rewards = vec![0f32; self.config.n_envs];
        let mut dones = vec![0f32; self.config.n_envs];

        for (lane, &action) in actions.iter().enumerate() {
            if action == Self::ACTION_LEFT {
                self.positions[lane] -= 1;
            } else {
                self.positions[lane] += 1;
            }
            self.steps[lane] += 1;

            let pos = self.positions[lane];
            let terminal = if pos == 0 {
                rewards[lane] = self.config.left_reward as f32;
                true
            } else if pos == self.config.n_states - 1 {
                rewards[lane] = self.config.right_reward as f32;
                true
            } else {
                self.steps[lane] >= self.config.max_episode_steps
            };

            if terminal {
                dones[lane] = 1.0;
                self.reset_lane(lane);
            }
        }

        EnvStep {
            obs: self.obs_tensor(),
            reward: Tensor::from_slice(&rewards),
            done: Tensor::from_slice(&dones),
        }
    }
}
