//! Errors of [`CarlaEnv`](crate::CarlaEnv).
//!
//! These are returned wrapped in [`anyhow::Error`]; use `downcast_ref::<CarlaEnvError>()`
//! to inspect them. None of them is an episode outcome: collisions, lane invasions and
//! the step limit end episodes through the `done` flags of a step.
use crate::sim::ActorId;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CarlaEnvError {
    /// The ego vehicle could not be spawned within the retry budget.
    #[error("Can't spawn a vehicle within {0:?}")]
    SpawnTimeout(Duration),

    /// The map has no spawn point to choose a start pose from.
    #[error("Map {0} has no spawn points")]
    NoSpawnPoints(String),

    /// The start pose strategy is restricted to another map.
    #[error("Start pose {strategy} is not available on map {map}")]
    UnsupportedMap { strategy: &'static str, map: String },

    /// The start location can not be projected onto a road.
    #[error("No road near the start location ({x}, {y})")]
    NoRoadAtStart { x: f64, y: f64 },

    /// A camera did not deliver a frame in time.
    #[error("Sensor {sensor} delivered no data within {waited:?}")]
    SensorTimeout { sensor: ActorId, waited: Duration },

    /// A camera frame can not be reshaped to `(height, width, channels)`.
    #[error("Frame of {len} bytes does not fit {height}x{width} pixels with at least 3 channels")]
    FrameShape {
        len: usize,
        height: usize,
        width: usize,
    },

    /// The variant of an action does not match the action mode of the environment.
    #[error("Action {got} given to an environment in {expected} mode")]
    ActionMismatch {
        expected: &'static str,
        got: &'static str,
    },

    /// A discrete action index outside `0..9`.
    #[error("Discrete action index {0} is out of range 0..9")]
    DiscreteIndexOutOfRange(usize),

    /// `step()` was called without a running episode.
    #[error("No running episode, call reset() first")]
    EpisodeNotRunning,
}
