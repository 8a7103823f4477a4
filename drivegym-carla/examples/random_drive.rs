use anyhow::Result;
use clap::Parser;
use drivegym_carla::{
    util::mock::MockSimulator, ActionMode, CarlaAct, CarlaEnv, CarlaEnvConfig, CarlaObs,
    DISCRETE_LEVELS,
};
use drivegym_core::{Configurable, DefaultEvaluator, Evaluator as _, Policy};
use serde::Deserialize;
use std::time::Duration;

type Env = CarlaEnv<MockSimulator>;

/// Drives a vehicle with random actions on the in-process simulator.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration of the environment in YAML.
    #[arg(long)]
    config: Option<String>,

    /// Number of episodes.
    #[arg(long, default_value_t = 3)]
    episodes: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Clone, Deserialize)]
struct RandomPolicyConfig {
    action_mode: ActionMode,
}

struct RandomPolicy {
    action_mode: ActionMode,
}

fn uniform(low: f32, high: f32) -> f32 {
    low + (high - low) * fastrand::f32()
}

impl Policy<Env> for RandomPolicy {
    fn sample(&mut self, _: &CarlaObs) -> CarlaAct {
        match &self.action_mode {
            ActionMode::Continuous { low, high } => CarlaAct::Continuous {
                throttle_brake: uniform(low[0], high[0]),
                steer: uniform(low[1], high[1]),
            },
            ActionMode::FixedThrottle { low, high, .. } => CarlaAct::FixedThrottle {
                steer: uniform(low[0], high[0]),
            },
            ActionMode::PurePursuitThrottle { low, high, .. } => CarlaAct::PurePursuit {
                throttle_brake: uniform(low[0], high[0]),
            },
            ActionMode::Discrete => CarlaAct::Discrete {
                throttle_ix: fastrand::usize(..DISCRETE_LEVELS.len()),
                steer_ix: fastrand::usize(..DISCRETE_LEVELS.len()),
            },
        }
    }
}

impl Configurable<Env> for RandomPolicy {
    type Config = RandomPolicyConfig;

    fn build(config: Self::Config) -> Self {
        Self {
            action_mode: config.action_mode,
        }
    }
}

fn env_config(args: &Args) -> Result<CarlaEnvConfig> {
    match &args.config {
        Some(path) => CarlaEnvConfig::load(path),
        None => Ok(CarlaEnvConfig::default()
            .action_mode(ActionMode::pure_pursuit_throttle())
            .steps_per_episode(200)
            .settle(Duration::from_millis(100))),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    fastrand::seed(args.seed);

    let env_config = env_config(&args)?;
    let mut policy = RandomPolicy::build(RandomPolicyConfig {
        action_mode: env_config.action_mode.clone(),
    });

    let record = DefaultEvaluator::<Env>::new(&env_config, args.seed as i64, args.episodes)?
        .evaluate(&mut policy)?;
    log::info!("{:?}", record);

    Ok(())
}
