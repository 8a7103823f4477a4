//! A driving environment for [`drivegym_core`] on a CARLA-style simulator.
//!
//! [`CarlaEnv`] runs the simulator in synchronous mode and turns it into an [`Env`]:
//! `reset()` spawns an ego vehicle with a camera and event sensors and returns the
//! first camera frame, `step()` applies an action, ticks the world and rewards the
//! progress away from the start point. Collisions and, depending on the
//! [`ActionMode`], lane invasions end an episode with a penalty.
//!
//! The simulator is accessed through the [`Simulator`] and [`RoadMap`] traits.
//! [`util::mock::MockSimulator`] implements them in-process and is used below.
//!
//! ```no_run
//! use anyhow::Result;
//! use drivegym_carla::{
//!     util::mock::MockSimulator, ActionMode, CarlaAct, CarlaEnv, CarlaEnvConfig, CarlaObs,
//! };
//! use drivegym_core::{DefaultEvaluator, Evaluator as _, Policy};
//!
//! # type Env = CarlaEnv<MockSimulator>;
//! #
//! struct Discrete;
//!
//! impl Policy<Env> for Discrete {
//!     fn sample(&mut self, _: &CarlaObs) -> CarlaAct {
//!         CarlaAct::Discrete {
//!             throttle_ix: fastrand::usize(4..9),
//!             steer_ix: fastrand::usize(3..6),
//!         }
//!     }
//! }
//!
//! fn main() -> Result<()> {
//! #     env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
//!     let config = CarlaEnvConfig::default()
//!         .action_mode(ActionMode::Discrete)
//!         .steps_per_episode(200);
//!
//!     let record = DefaultEvaluator::<Env>::new(&config, 0, 5)?.evaluate(&mut Discrete)?;
//!     println!("{:?}", record.get_scalar("Episode return")?);
//!
//!     Ok(())
//! }
//! ```
//!
//! [`Env`]: drivegym_core::Env
mod act;
mod actor;
mod env;
mod error;
mod obs;
mod pure_pursuit;
mod reward;
mod sensor;
pub mod sim;
mod start_pose;
mod traffic;
pub mod util;
pub use act::{ActionMode, CarlaAct, DISCRETE_LEVELS};
pub use actor::{ActorKind, ActorSet, EpisodeGuard};
pub use env::{CarlaEnv, CarlaEnvConfig, CarlaInfo, DEFAULT_SEED};
pub use error::CarlaEnvError;
pub use obs::CarlaObs;
pub use pure_pursuit::{PurePursuit, PurePursuitConfig};
pub use reward::{Evaluation, RewardEvaluator, TerminationCause};
pub use sensor::{
    decode_frame, EventHistory, EventLog, FrameQueue, SensorType, NAVIGATION_CLASSES,
    SEMANTIC_CLASSES, SEMANTIC_LABEL_CHANNEL,
};
pub use sim::{RoadMap, Simulator};
pub use start_pose::StartPose;
pub use traffic::{spawn_traffic, TrafficConfig};
