//! Episode lifecycle of the driving environment.
mod config;
use crate::{
    act::{ActionMode, CarlaAct},
    actor::{ActorKind, ActorSet, EpisodeGuard},
    error::CarlaEnvError,
    obs::CarlaObs,
    pure_pursuit::{PurePursuit, PurePursuitConfig},
    reward::{Evaluation, RewardEvaluator, TerminationCause},
    sensor::{decode_frame, EventHistory, FrameQueue, SensorType},
    sim::{
        ActorId, AttachmentType, Location, RoadMap, Rotation, Simulator, Transform,
        VehicleControl, WorldSettings,
    },
    traffic::spawn_traffic,
};
use anyhow::{Context, Result};
pub use config::CarlaEnvConfig;
use drivegym_core::{
    record::{Record, RecordValue},
    ActionSpace, Env, Info, ObservationSpace, Step,
};
use log::{debug, info};
use ndarray::Array3;
use rand::{rngs::StdRng, SeedableRng};
use std::{thread, time::Instant};

/// Seed used when neither the configuration nor [`Env::build`] gives one.
pub const DEFAULT_SEED: u64 = 7;

const PREVIEW_SIZE: usize = 400;
const SPECTATOR_HEIGHT: f64 = 70.0;

/// Information on the last transition of a step.
#[derive(Debug, Clone, PartialEq)]
pub struct CarlaInfo {
    pub frame_step: usize,

    /// Speed of the ego vehicle in km/h.
    pub speed_kmh: f64,

    /// Distance of the ego vehicle from its start point in meters.
    pub dist_from_start: f64,

    pub cause: Option<TerminationCause>,
}

impl Info for CarlaInfo {}

impl CarlaInfo {
    fn to_record(&self) -> Record {
        let mut record = Record::from_slice(&[
            ("frame_step", RecordValue::Scalar(self.frame_step as f64)),
            ("speed_kmh", RecordValue::Scalar(self.speed_kmh)),
            ("dist_from_start", RecordValue::Scalar(self.dist_from_start)),
        ]);
        if let Some(cause) = self.cause {
            record.insert("termination", RecordValue::String(cause.to_string()));
        }
        record
    }
}

/// State of the running episode.
struct Episode {
    frame_step: usize,
    start: Location,
    dist_from_start: f64,
    ego: ActorId,
    camera: ActorId,
    frames: FrameQueue,
    preview: Option<FrameQueue>,
    events: EventHistory,
}

/// Result of a single tick.
struct Transition {
    obs: CarlaObs,
    evaluation: Evaluation,
    info: CarlaInfo,
    preview: Option<Array3<u8>>,
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// A driving environment on a [`Simulator`].
///
/// The simulator runs in synchronous mode: the world only advances when the
/// environment ticks it, once per transition. Every episode spawns an ego vehicle with
/// a camera, a collision sensor and a lane invasion sensor, plus background traffic in
/// pure pursuit mode. All of them are destroyed when the episode ends, when an error
/// occurs while the episode is set up or advanced, and when the environment is dropped.
///
/// # Episode lifecycle
///
/// ```mermaid
/// stateDiagram-v2
///     [*] --> Idle
///     Idle --> Spawning: reset()
///     Spawning --> Idle: SpawnTimeout / SensorTimeout (teardown)
///     Spawning --> Running: first frame received
///     Running --> Running: step(), not done
///     Running --> Idle: collision / lane invasion / step limit (teardown)
///     Running --> Idle: error (teardown)
///     Running --> Spawning: reset() (teardown)
/// ```
///
/// # Transition
///
/// A single tick, [`CarlaEnv::step_once`], does the following:
///
/// 1. Tick the world and increment the frame counter.
/// 2. Decode the action into [`VehicleControl`] and apply it. In pure pursuit mode
///    the steer is computed by [`PurePursuit`].
/// 3. Measure the speed and the distance from the start point.
/// 4. Pop the frame of the tick from the camera queue and decode it.
/// 5. Evaluate reward and termination with [`RewardEvaluator`].
/// 6. Tear the episode down if it is done.
pub struct CarlaEnv<S: Simulator> {
    config: CarlaEnvConfig,
    sim: S,
    seed: u64,
    rng: StdRng,
    actors: ActorSet,
    episode: Option<Episode>,
    pure_pursuit: PurePursuit,
    reward: RewardEvaluator,
    preview: Option<Array3<u8>>,
}

impl<S: Simulator> CarlaEnv<S> {
    /// Builds the environment on a connected simulator.
    ///
    /// `seed` is used if the configuration does not set one, 0 selects [`DEFAULT_SEED`].
    /// A negative `seed` is an error.
    pub fn with_simulator(mut sim: S, config: CarlaEnvConfig, seed: i64) -> Result<Self> {
        let seed = match config.seed {
            Some(seed) => seed,
            None if seed == 0 => DEFAULT_SEED,
            None => u64::try_from(seed).with_context(|| format!("Negative seed {}", seed))?,
        };

        sim.apply_settings(&WorldSettings {
            synchronous_mode: true,
            fixed_delta_seconds: Some(1.0 / config.world.fps),
            no_rendering_mode: config.world.no_rendering,
        })?;
        sim.set_global_speed_difference(config.traffic.global_speed_difference)?;

        let controller = match &config.action_mode {
            ActionMode::PurePursuitThrottle { controller, .. } => controller.clone(),
            _ => PurePursuitConfig::default(),
        };
        let reward = RewardEvaluator::new(
            config.steps_per_episode,
            config.action_mode.is_pure_pursuit(),
        );
        info!(
            "Built environment on {}, action mode {}, seed {}",
            sim.map().name(),
            config.action_mode.name(),
            seed
        );

        Ok(Self {
            sim,
            seed,
            rng: StdRng::seed_from_u64(seed),
            actors: ActorSet::default(),
            episode: None,
            pure_pursuit: PurePursuit::new(controller),
            reward,
            preview: None,
            config,
        })
    }

    pub fn config(&self) -> &CarlaEnvConfig {
        &self.config
    }

    pub fn simulator(&self) -> &S {
        &self.sim
    }

    pub fn simulator_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    /// Actors owned by the running episode, empty between episodes.
    pub fn actors(&self) -> &ActorSet {
        &self.actors
    }

    pub fn is_running(&self) -> bool {
        self.episode.is_some()
    }

    /// Number of ticks of the running episode.
    pub fn frame_step(&self) -> Option<usize> {
        self.episode.as_ref().map(|e| e.frame_step)
    }

    /// Latest frame of the preview camera.
    pub fn preview_frame(&self) -> Option<&Array3<u8>> {
        self.preview.as_ref()
    }

    /// Ends the running episode and releases its actors. Does nothing between episodes.
    pub fn teardown(&mut self) {
        self.episode = None;
        self.actors.teardown(&mut self.sim);
    }

    /// Advances the world by a single tick.
    pub fn step_once(&mut self, act: &CarlaAct) -> Result<(CarlaObs, Evaluation, CarlaInfo)> {
        let mut episode = self
            .episode
            .take()
            .ok_or(CarlaEnvError::EpisodeNotRunning)?;
        let mut guard = EpisodeGuard::new(&mut self.sim, &mut self.actors);
        let transition = Self::advance(
            &mut guard,
            &mut episode,
            &self.config,
            &mut self.pure_pursuit,
            &self.reward,
            act,
        )?;

        if let Some(frame) = transition.preview {
            self.preview = Some(frame);
        }
        if transition.evaluation.is_done() {
            debug!(
                "Episode ended after {} steps: {:?}",
                episode.frame_step, transition.info.cause
            );
        } else {
            guard.disarm();
            self.episode = Some(episode);
        }

        Ok((transition.obs, transition.evaluation, transition.info))
    }

    fn advance(
        guard: &mut EpisodeGuard<S>,
        episode: &mut Episode,
        config: &CarlaEnvConfig,
        pure_pursuit: &mut PurePursuit,
        reward: &RewardEvaluator,
        act: &CarlaAct,
    ) -> Result<Transition> {
        guard.sim().tick()?;
        episode.frame_step += 1;

        let ego = episode.ego;
        let control = {
            let sim: &S = guard.sim();
            config.action_mode.decode(act, || {
                let transform = sim.transform(ego)?;
                let velocity = sim.velocity(ego)?;
                Ok(pure_pursuit.steer(sim.map(), &transform, &velocity))
            })?
        };
        let sim = guard.sim();
        sim.apply_control(ego, &control)?;

        let speed_kmh = 3.6 * sim.velocity(ego)?.length();
        let prev_dist = episode.dist_from_start;
        episode.dist_from_start = sim.transform(ego)?.location.distance(&episode.start);

        let image = episode
            .frames
            .pop(episode.camera, config.sensor_timeout_duration())?;
        let obs = decode_frame(image, config.sensor)?.into();
        let preview = match episode.preview.as_ref().and_then(FrameQueue::drain_latest) {
            Some(image) => Some(decode_frame(image, SensorType::Rgb)?),
            None => None,
        };

        let evaluation = reward.evaluate(
            &mut episode.events,
            prev_dist,
            episode.dist_from_start,
            episode.frame_step,
        );
        let info = CarlaInfo {
            frame_step: episode.frame_step,
            speed_kmh,
            dist_from_start: episode.dist_from_start,
            cause: evaluation.cause,
        };

        Ok(Transition {
            obs,
            evaluation,
            info,
            preview,
        })
    }

    /// Spawns the actors of a new episode and waits for the first frame.
    fn start_episode(
        guard: &mut EpisodeGuard<S>,
        config: &CarlaEnvConfig,
        rng: &mut StdRng,
    ) -> Result<(Episode, CarlaObs)> {
        if config.action_mode.is_pure_pursuit() {
            for id in spawn_traffic(guard.sim(), rng, &config.traffic) {
                guard.register(ActorKind::Traffic, id);
            }
        }

        let (ego, start) = Self::spawn_ego(guard, config, rng)?;
        if config.enable_spectator {
            let above = start.location + Location::new(0.0, 0.0, SPECTATOR_HEIGHT);
            guard
                .sim()
                .set_spectator_transform(&Transform::new(above, Rotation::new(-90.0, 0.0, 0.0)))?;
        }

        let extent = guard.sim().bounding_box_extent(ego)?;
        let frames = FrameQueue::new();
        let front = Transform::new(
            Location::new(1.5 * extent.x, 0.0, 0.5 * extent.z),
            Rotation::default(),
        );
        let camera = Self::spawn_camera(
            guard,
            config.sensor,
            (config.im_width, config.im_height),
            config.camera_fov,
            (ego, front, AttachmentType::Rigid),
            ActorKind::Camera,
            &frames,
        )?;

        let preview = if config.enable_preview {
            let queue = FrameQueue::new();
            let chase = Transform::new(
                Location::new(-5.0 * extent.y, 0.0, 3.0 * extent.z),
                Rotation::new(6.0, 0.0, 0.0),
            );
            Self::spawn_camera(
                guard,
                SensorType::Rgb,
                (PREVIEW_SIZE, PREVIEW_SIZE),
                config.camera_fov,
                (ego, chase, AttachmentType::SpringArm),
                ActorKind::PreviewCamera,
                &queue,
            )?;
            Some(queue)
        } else {
            None
        };

        guard.sim().apply_control(ego, &VehicleControl::hold())?;
        thread::sleep(config.settle_duration());

        let events = EventHistory::new();
        let collision =
            Self::spawn_sensor(guard, "sensor.other.collision", ego, ActorKind::CollisionSensor)?;
        guard.sim().listen(collision, events.collision_callback())?;
        let lane = Self::spawn_sensor(
            guard,
            "sensor.other.lane_invasion",
            ego,
            ActorKind::LaneInvasionSensor,
        )?;
        guard.sim().listen(lane, events.lane_invasion_callback())?;

        frames.wait_for_frame(
            guard.sim(),
            camera,
            config.sensor_poll_duration(),
            config.sensor_timeout_duration(),
        )?;
        guard.sim().apply_control(ego, &VehicleControl::release())?;

        let image = frames.pop(camera, config.sensor_timeout_duration())?;
        let obs = decode_frame(image, config.sensor)?.into();

        let episode = Episode {
            frame_step: 0,
            start: start.location,
            dist_from_start: 0.0,
            ego,
            camera,
            frames,
            preview,
            events,
        };
        Ok((episode, obs))
    }

    /// Spawns the ego vehicle, retrying until the spawn timeout.
    ///
    /// A start pose is chosen for every attempt.
    fn spawn_ego(
        guard: &mut EpisodeGuard<S>,
        config: &CarlaEnvConfig,
        rng: &mut StdRng,
    ) -> Result<(ActorId, Transform)> {
        let mut blueprint = guard.sim().find_blueprint(&config.vehicle_blueprint)?;
        blueprint.set_attribute("role_name", "hero");
        let timeout = config.spawn_timeout_duration();
        let start = Instant::now();

        loop {
            let pose = config.start_pose.choose(guard.sim().map(), rng)?;
            match guard.sim().try_spawn_actor(&blueprint, &pose, None) {
                Ok(id) => {
                    guard.register(ActorKind::Ego, id);
                    debug!("Spawned {} at {:?}", id, pose.location);
                    return Ok((id, pose));
                }
                Err(e) => debug!("Failed to spawn the vehicle: {}", e),
            }
            if start.elapsed() > timeout {
                return Err(CarlaEnvError::SpawnTimeout(timeout).into());
            }
            thread::sleep(config.spawn_poll_duration());
        }
    }

    fn spawn_camera(
        guard: &mut EpisodeGuard<S>,
        sensor: SensorType,
        (width, height): (usize, usize),
        fov: f64,
        (parent, transform, attachment): (ActorId, Transform, AttachmentType),
        kind: ActorKind,
        queue: &FrameQueue,
    ) -> Result<ActorId> {
        let mut blueprint = guard.sim().find_blueprint(sensor.blueprint_id())?;
        blueprint.set_attribute("image_size_x", width);
        blueprint.set_attribute("image_size_y", height);
        blueprint.set_attribute("fov", fov);
        let id = guard
            .sim()
            .try_spawn_actor(&blueprint, &transform, Some((parent, attachment)))?;
        guard.register(kind, id);
        guard.sim().listen(id, queue.callback())?;
        Ok(id)
    }

    fn spawn_sensor(
        guard: &mut EpisodeGuard<S>,
        blueprint: &str,
        parent: ActorId,
        kind: ActorKind,
    ) -> Result<ActorId> {
        let blueprint = guard.sim().find_blueprint(blueprint)?;
        let id = guard.sim().try_spawn_actor(
            &blueprint,
            &Transform::default(),
            Some((parent, AttachmentType::Rigid)),
        )?;
        guard.register(kind, id);
        Ok(id)
    }
}

impl<S: Simulator> Env for CarlaEnv<S> {
    type Config = CarlaEnvConfig;
    type Obs = CarlaObs;
    type Act = CarlaAct;
    type Info = CarlaInfo;

    /// Connects to the simulator and builds the environment.
    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        let sim = S::connect(&config.world)?;
        Self::with_simulator(sim, config.clone(), seed)
    }

    /// Applies `act` for `repeat_action` ticks, or until the episode ends.
    ///
    /// The reward is the sum over the ticks, the observation and the info are those of
    /// the last tick.
    fn step(&mut self, act: &Self::Act) -> Result<(Step<Self>, Record)> {
        let (mut obs, mut evaluation, mut info) = self.step_once(act)?;
        let mut total_reward = evaluation.reward;
        for _ in 1..self.config.repeat_action {
            if evaluation.is_done() {
                break;
            }
            (obs, evaluation, info) = self.step_once(act)?;
            total_reward += evaluation.reward;
        }

        let record = info.to_record();
        let step = Step::new(
            obs,
            *act,
            total_reward,
            evaluation.is_terminated,
            evaluation.is_truncated,
            info,
        );
        Ok((step, record))
    }

    fn reset(&mut self) -> Result<Self::Obs> {
        self.teardown();
        self.pure_pursuit.reset();
        self.preview = None;

        let mut guard = EpisodeGuard::new(&mut self.sim, &mut self.actors);
        let (episode, obs) = Self::start_episode(&mut guard, &self.config, &mut self.rng)?;
        guard.disarm();
        self.episode = Some(episode);

        Ok(obs)
    }

    /// Reseeds the random number generator with `seed + ix` and resets.
    fn reset_with_index(&mut self, ix: usize) -> Result<Self::Obs> {
        self.rng = StdRng::seed_from_u64(self.seed.wrapping_add(ix as u64));
        self.reset()
    }

    fn action_space(&self) -> ActionSpace {
        self.config.action_mode.action_space()
    }

    fn observation_space(&self) -> ObservationSpace {
        ObservationSpace::image(self.config.im_height, self.config.im_width, 3)
    }
}

impl<S: Simulator> Drop for CarlaEnv<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
