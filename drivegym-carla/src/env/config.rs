//! Configuration of [`CarlaEnv`](super::CarlaEnv).
use crate::{
    act::ActionMode, sensor::SensorType, sim::WorldConfig, start_pose::StartPose,
    traffic::TrafficConfig,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
    time::Duration,
};

/// Configuration of [`CarlaEnv`](super::CarlaEnv).
///
/// Fields missing in a YAML file take their default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarlaEnvConfig {
    /// Connection to the simulator and the map.
    pub world: WorldConfig,

    /// Width of the primary camera image in pixels.
    pub im_width: usize,

    /// Height of the primary camera image in pixels.
    pub im_height: usize,

    /// Number of ticks an action is applied for in a single `step()`.
    pub repeat_action: usize,

    pub start_pose: StartPose,

    /// Type of the primary camera.
    pub sensor: SensorType,

    pub action_mode: ActionMode,

    /// Attaches a chase camera whose frames are available through
    /// [`CarlaEnv::preview_frame`](super::CarlaEnv::preview_frame).
    pub enable_preview: bool,

    /// Moves the spectator above the ego vehicle at the beginning of an episode.
    pub enable_spectator: bool,

    /// Episodes are truncated after this number of ticks.
    pub steps_per_episode: usize,

    /// Overrides the seed given to [`Env::build`](drivegym_core::Env::build).
    pub seed: Option<u64>,

    /// Background traffic, spawned in pure pursuit mode only.
    pub traffic: TrafficConfig,

    pub vehicle_blueprint: String,

    /// Horizontal field of view of the cameras in degrees.
    pub camera_fov: f64,

    pub spawn_timeout_ms: u64,
    pub spawn_poll_ms: u64,

    /// Time the vehicle is held with full brake before the episode starts.
    pub settle_ms: u64,

    /// Maximum wait for a camera frame.
    pub sensor_timeout_ms: u64,
    pub sensor_poll_ms: u64,
}

impl Default for CarlaEnvConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            im_width: 160,
            im_height: 80,
            repeat_action: 1,
            start_pose: StartPose::default(),
            sensor: SensorType::Rgb,
            action_mode: ActionMode::default(),
            enable_preview: false,
            enable_spectator: false,
            steps_per_episode: 1000,
            seed: None,
            traffic: TrafficConfig::default(),
            vehicle_blueprint: "vehicle.dodge.charger_2020".to_string(),
            camera_fov: 100.0,
            spawn_timeout_ms: 3000,
            spawn_poll_ms: 10,
            settle_ms: 4000,
            sensor_timeout_ms: 10_000,
            sensor_poll_ms: 10,
        }
    }
}

impl CarlaEnvConfig {
    /// Sets the configuration of the world.
    pub fn world(mut self, world: WorldConfig) -> Self {
        self.world = world;
        self
    }

    /// Sets the name of the map.
    pub fn town(mut self, town: impl Into<String>) -> Self {
        self.world.town = town.into();
        self
    }

    /// Sets the size of the primary camera image.
    pub fn image_size(mut self, width: usize, height: usize) -> Self {
        self.im_width = width;
        self.im_height = height;
        self
    }

    pub fn repeat_action(mut self, v: usize) -> Self {
        self.repeat_action = v;
        self
    }

    pub fn start_pose(mut self, v: StartPose) -> Self {
        self.start_pose = v;
        self
    }

    pub fn sensor(mut self, v: SensorType) -> Self {
        self.sensor = v;
        self
    }

    pub fn action_mode(mut self, v: ActionMode) -> Self {
        self.action_mode = v;
        self
    }

    pub fn enable_preview(mut self, v: bool) -> Self {
        self.enable_preview = v;
        self
    }

    pub fn enable_spectator(mut self, v: bool) -> Self {
        self.enable_spectator = v;
        self
    }

    /// Sets the number of ticks after which an episode is truncated.
    pub fn steps_per_episode(mut self, v: usize) -> Self {
        self.steps_per_episode = v;
        self
    }

    pub fn seed(mut self, v: u64) -> Self {
        self.seed = Some(v);
        self
    }

    pub fn traffic(mut self, v: TrafficConfig) -> Self {
        self.traffic = v;
        self
    }

    pub fn vehicle_blueprint(mut self, v: impl Into<String>) -> Self {
        self.vehicle_blueprint = v.into();
        self
    }

    /// Sets the retry budget and interval of spawning the ego vehicle.
    pub fn spawn_timeout(mut self, timeout: Duration, poll: Duration) -> Self {
        self.spawn_timeout_ms = timeout.as_millis() as u64;
        self.spawn_poll_ms = poll.as_millis() as u64;
        self
    }

    /// Sets the time the vehicle is held before the episode starts.
    pub fn settle(mut self, v: Duration) -> Self {
        self.settle_ms = v.as_millis() as u64;
        self
    }

    /// Sets the maximum wait for a camera frame and the polling interval of warm-up.
    pub fn sensor_timeout(mut self, timeout: Duration, poll: Duration) -> Self {
        self.sensor_timeout_ms = timeout.as_millis() as u64;
        self.sensor_poll_ms = poll.as_millis() as u64;
        self
    }

    /// Constructs [`CarlaEnvConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let config = serde_yaml::from_reader(rdr)?;
        Ok(config)
    }

    /// Saves [`CarlaEnvConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }

    pub(super) fn spawn_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }

    pub(super) fn spawn_poll_duration(&self) -> Duration {
        Duration::from_millis(self.spawn_poll_ms)
    }

    pub(super) fn settle_duration(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub(super) fn sensor_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub(super) fn sensor_poll_duration(&self) -> Duration {
        Duration::from_millis(self.sensor_poll_ms)
    }
}
