use anyhow::{Context, Result};
use std::{env, fs};
use svpg::{ChainConfig, ChainEnv, Learner, LearnerConfig, PortraitSpec, value_portrait};

const N_STATES: usize = 8;

/// Train an SVPG ensemble on the chain environment. Pass a TOML file with a
/// `LearnerConfig` to override the defaults.
fn main() -> Result<()> {
    env_logger::init();

    let config: LearnerConfig = match env::args().nth(1) {
        Some(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            toml::from_str(&raw).with_context(|| format!("parsing {path}"))?
        }
        None => LearnerConfig {
            n_particles: 4,
            n_envs: 8,
            rollout_len: 8,
            n_samples: 512,
            max_epochs: 50,
            ..Default::default()
        },
    };

    let n_envs = config.n_envs;
    let seed = config.random_seed as u64;
    let device = config.device;

    let mut learner = Learner::new(
        || {
            ChainEnv::new(ChainConfig {
                n_states: N_STATES,
                n_envs,
                random_start: true,
                seed,
                ..Default::default()
            })
        },
        config,
    )?;
    learner.learn()?;

    // project particle 0's value function over the two terminal-adjacent
    // state indicators
    let spec = PortraitSpec {
        definition: 100,
        dims: (1, N_STATES - 2),
        x_range: (0.0, 1.0),
        y_range: (0.0, 1.0),
        base_obs: vec![0.0; N_STATES],
    };
    let critic = &learner.svpg().particles()[0].critic;
    value_portrait(critic, &spec, device, "critic_portrait.png")?;
    println!("wrote critic_portrait.png");

    Ok(())
}
