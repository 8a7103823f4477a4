use anyhow::Result;
use drivegym_carla::{
    sim::{LaneMarkingType, Vector3D},
    util::mock::MockSimulator,
    ActionMode, ActorKind, CarlaAct, CarlaEnv, CarlaEnvConfig, CarlaEnvError, SensorType,
    Simulator, TrafficConfig,
};
use drivegym_core::{
    record::Record, ActionSpace, DefaultEvaluator, Env as _, Evaluator as _, Policy, Step,
};
use std::time::Duration;
use test_log::test;

type Env = CarlaEnv<MockSimulator>;

const IDLE: CarlaAct = CarlaAct::Continuous {
    throttle_brake: 0.0,
    steer: 0.0,
};

const FORWARD: CarlaAct = CarlaAct::Continuous {
    throttle_brake: 0.5,
    steer: 0.0,
};

fn config() -> CarlaEnvConfig {
    CarlaEnvConfig::default()
        .image_size(32, 16)
        .settle(Duration::ZERO)
        .spawn_timeout(Duration::from_millis(200), Duration::from_millis(1))
        .sensor_timeout(Duration::from_millis(200), Duration::from_millis(1))
}

fn pure_pursuit_config() -> CarlaEnvConfig {
    config()
        .action_mode(ActionMode::pure_pursuit_throttle())
        .traffic(TrafficConfig {
            n_vehicles: 10,
            ..TrafficConfig::default()
        })
}

/// Builds an environment and returns it with a handle on its simulator.
fn build(config: CarlaEnvConfig) -> Result<(Env, MockSimulator)> {
    let sim = MockSimulator::connect(&config.world)?;
    let handle = sim.clone();
    let env = CarlaEnv::with_simulator(sim, config, 0)?;
    Ok((env, handle))
}

fn carla_error(err: &anyhow::Error) -> Option<&CarlaEnvError> {
    err.downcast_ref::<CarlaEnvError>()
}

#[test]
fn reset_spawns_actors_of_a_single_episode() -> Result<()> {
    let (mut env, sim) = build(config())?;
    assert!(env.actors().is_empty());

    for _ in 0..3 {
        let obs = env.reset()?;
        assert_eq!(obs.image.shape(), &[16, 32, 3]);

        let actors = env.actors();
        assert_eq!(actors.count(ActorKind::Ego), 1);
        assert_eq!(actors.count(ActorKind::Camera), 1);
        assert_eq!(actors.count(ActorKind::PreviewCamera), 0);
        assert_eq!(actors.count(ActorKind::CollisionSensor), 1);
        assert_eq!(actors.count(ActorKind::LaneInvasionSensor), 1);
        assert_eq!(actors.count(ActorKind::Traffic), 0);
        assert_eq!(actors.len(), 4);

        // Nothing of earlier episodes is left in the world.
        assert_eq!(sim.alive_actor_count(), 4);
        assert_eq!(sim.listening_count(), 3);
        assert_eq!(env.frame_step(), Some(0));
    }
    Ok(())
}

#[test]
fn preview_camera() -> Result<()> {
    let (mut env, sim) = build(config().enable_preview(true))?;
    env.reset()?;
    assert_eq!(env.actors().count(ActorKind::PreviewCamera), 1);
    assert_eq!(sim.alive_actor_count(), 5);
    assert_eq!(sim.listening_count(), 4);

    env.step(&IDLE)?;
    let frame = env.preview_frame().expect("preview frame after a step");
    assert_eq!(frame.shape(), &[400, 400, 3]);
    Ok(())
}

#[test]
fn world_is_synchronous() -> Result<()> {
    let (mut env, sim) = build(config().enable_spectator(true))?;
    let settings = sim.settings().expect("settings applied at build");
    assert!(settings.synchronous_mode);
    assert_eq!(settings.fixed_delta_seconds, Some(0.1));
    assert_eq!(sim.global_speed_difference(), 60.0);

    env.reset()?;
    let ego = env.actors().ids(ActorKind::Ego).next().expect("ego vehicle");
    let start = sim.transform(ego)?;
    let spectator = sim.spectator().expect("spectator moved");
    assert_eq!(spectator.location.z, start.location.z + 70.0);
    assert_eq!(spectator.rotation.pitch, -90.0);
    assert_eq!(
        sim.blueprint_of(ego).and_then(|b| b.attribute("role_name").map(String::from)),
        Some("hero".to_string())
    );
    Ok(())
}

#[test]
fn step_limit_truncates_episode() -> Result<()> {
    let (mut env, sim) = build(config().steps_per_episode(100))?;
    env.reset()?;

    let mut total_reward = 0.0;
    let mut last: Option<(Step<Env>, Record)> = None;
    for i in 1..=100 {
        let (step, record) = env.step(&FORWARD)?;
        total_reward += step.reward;
        assert_eq!(step.info.frame_step, i);
        assert_eq!(step.is_done(), i == 100);
        last = Some((step, record));
    }

    let (step, record) = last.expect("100 steps");
    assert!(step.is_truncated);
    assert!(!step.is_terminated);
    assert_eq!(record.get_string("termination")?, "step_limit");
    assert_eq!(record.get_scalar("frame_step")?, 100.0);
    assert!(record.get_scalar("speed_kmh")? > 0.0);

    // Progress rewards add up to the squared final distance.
    let dist = step.info.dist_from_start;
    assert!(dist > 1.0);
    assert!((total_reward - dist * dist).abs() < 1e-6 * dist * dist);

    assert!(env.actors().is_empty());
    assert_eq!(sim.alive_actor_count(), 0);
    Ok(())
}

#[test]
fn idle_vehicle_gets_no_reward() -> Result<()> {
    let (mut env, _sim) = build(config())?;
    env.reset()?;
    for _ in 0..5 {
        let (step, _) = env.step(&IDLE)?;
        assert_eq!(step.reward, 0.0);
        assert_eq!(step.info.dist_from_start, 0.0);
    }
    Ok(())
}

#[test]
fn collision_ends_episode() -> Result<()> {
    let (mut env, sim) = build(config())?;
    env.reset()?;

    let mut prev_dist = 0.0;
    for _ in 0..5 {
        let (step, _) = env.step(&FORWARD)?;
        prev_dist = step.info.dist_from_start;
    }

    sim.inject_collision("static.prop", Vector3D::new(0.0, 300.0, 0.0));
    let (step, record) = env.step(&FORWARD)?;
    let dist = step.info.dist_from_start;
    assert!(step.is_terminated);
    assert!((step.reward - (-100.0 + dist * dist - prev_dist * prev_dist)).abs() < 1e-9);
    assert_eq!(record.get_string("termination")?, "collision");

    assert!(env.actors().is_empty());
    assert!(!env.is_running());
    assert_eq!(sim.alive_actor_count(), 0);
    assert_eq!(sim.listening_count(), 0);

    let err = env.step(&FORWARD).unwrap_err();
    assert!(matches!(carla_error(&err), Some(CarlaEnvError::EpisodeNotRunning)));
    Ok(())
}

#[test]
fn lane_invasion_depends_on_action_mode() -> Result<()> {
    let (mut env, sim) = build(config())?;
    env.reset()?;
    sim.inject_lane_invasion(vec![LaneMarkingType::Solid]);
    let (step, record) = env.step(&IDLE)?;
    assert!(step.is_terminated);
    assert_eq!(step.reward, -100.0);
    assert_eq!(record.get_string("termination")?, "lane_invasion");

    let (mut env, sim) = build(pure_pursuit_config())?;
    env.reset()?;
    sim.inject_lane_invasion(vec![LaneMarkingType::Solid]);
    let (step, _) = env.step(&CarlaAct::PurePursuit {
        throttle_brake: 0.3,
    })?;
    assert!(!step.is_done());
    assert!(step.reward >= 0.0);

    // Collisions end episodes in every mode.
    sim.inject_collision("vehicle.audi.a2", Vector3D::new(100.0, 0.0, 0.0));
    let (step, _) = env.step(&CarlaAct::PurePursuit {
        throttle_brake: 0.3,
    })?;
    assert!(step.is_terminated);
    Ok(())
}

#[test]
fn pure_pursuit_spawns_traffic_and_steers() -> Result<()> {
    let (mut env, sim) = build(pure_pursuit_config())?;
    env.reset()?;

    let n_traffic = env.actors().count(ActorKind::Traffic);
    assert!(n_traffic > 0 && n_traffic <= 10);
    assert_eq!(sim.autopilot_count(), n_traffic);
    assert_eq!(sim.alive_actor_count(), n_traffic + 4);

    let ego = env.actors().ids(ActorKind::Ego).next().expect("ego vehicle");
    for _ in 0..30 {
        let (step, _) = env.step(&CarlaAct::PurePursuit {
            throttle_brake: 0.4,
        })?;
        assert!(!step.is_done());
        let control = sim.control(ego).expect("ego is alive");
        assert!((-1.0..=1.0).contains(&control.steer));
        assert_eq!(control.throttle, 0.4f32 as f64);
        assert_eq!(control.brake, 0.0);
    }

    // The vehicle stays on the centerline of the straight road.
    assert!(sim.transform(ego)?.location.y.abs() < 0.1);

    env.reset()?;
    assert_eq!(sim.alive_actor_count(), env.actors().len());
    Ok(())
}

#[test]
fn spawn_timeout_leaves_no_actor() -> Result<()> {
    let config = pure_pursuit_config();
    let (mut env, sim) = build(config.clone())?;
    sim.block_spawns(&config.vehicle_blueprint);

    let err = env.reset().unwrap_err();
    assert!(matches!(carla_error(&err), Some(CarlaEnvError::SpawnTimeout(_))));
    assert!(env.actors().is_empty());
    assert_eq!(sim.alive_actor_count(), 0);
    Ok(())
}

#[test]
fn transient_spawn_failures_are_retried() -> Result<()> {
    let (mut env, sim) = build(config())?;
    sim.fail_next_spawns(5);
    env.reset()?;
    assert_eq!(sim.alive_actor_count(), 4);
    Ok(())
}

#[test]
fn sensor_timeout_leaves_no_actor() -> Result<()> {
    let (mut env, sim) = build(config())?;
    sim.set_camera_warmup(u64::MAX);

    let err = env.reset().unwrap_err();
    assert!(matches!(carla_error(&err), Some(CarlaEnvError::SensorTimeout { .. })));
    assert_eq!(sim.alive_actor_count(), 0);
    assert_eq!(sim.listening_count(), 0);
    Ok(())
}

#[test]
fn camera_warmup_is_awaited() -> Result<()> {
    let (mut env, sim) = build(config())?;
    sim.set_camera_warmup(5);
    let before = sim.frame();
    env.reset()?;
    assert!(sim.frame() >= before + 6);
    Ok(())
}

#[test]
fn repeat_action() -> Result<()> {
    let (mut env, sim) = build(config().repeat_action(4).steps_per_episode(10))?;
    env.reset()?;

    let frame = sim.frame();
    let (step, _) = env.step(&IDLE)?;
    assert_eq!(step.info.frame_step, 4);
    assert_eq!(sim.frame(), frame + 4);

    env.step(&IDLE)?;
    // Stops at the step limit.
    let (step, _) = env.step(&IDLE)?;
    assert_eq!(step.info.frame_step, 10);
    assert!(step.is_truncated);
    assert_eq!(sim.frame(), frame + 10);
    Ok(())
}

#[test]
fn single_transition() -> Result<()> {
    let (mut env, _sim) = build(config())?;
    let err = env.step_once(&IDLE).unwrap_err();
    assert!(matches!(carla_error(&err), Some(CarlaEnvError::EpisodeNotRunning)));

    env.reset()?;
    env.step_once(&IDLE)?;
    assert_eq!(env.frame_step(), Some(1));
    env.step_once(&IDLE)?;
    assert_eq!(env.frame_step(), Some(2));
    Ok(())
}

#[test]
fn action_mismatch_ends_episode() -> Result<()> {
    let (mut env, sim) = build(config().action_mode(ActionMode::Discrete))?;
    env.reset()?;

    let err = env.step(&FORWARD).unwrap_err();
    assert!(matches!(
        carla_error(&err),
        Some(CarlaEnvError::ActionMismatch {
            expected: "discrete",
            got: "continuous"
        })
    ));
    assert!(!env.is_running());
    assert_eq!(sim.alive_actor_count(), 0);

    env.reset()?;
    let (step, _) = env.step(&CarlaAct::Discrete {
        throttle_ix: 8,
        steer_ix: 4,
    })?;
    assert!(!step.is_done());
    Ok(())
}

#[test]
fn semantic_observation() -> Result<()> {
    let (mut env, _sim) = build(config().sensor(SensorType::Semantic))?;
    let obs = env.reset()?;
    assert_eq!(obs.image.shape(), &[16, 32, 3]);
    assert!(obs.image.iter().all(|&v| v == 0 || v == 255));

    // The mock renders road lines (class 7) on the lower half.
    assert_eq!(obs.image[[15, 0, 2]], 255);
    assert_eq!(obs.image[[0, 0, 2]], 0);
    assert_eq!(obs.image[[15, 0, 0]], 0);
    Ok(())
}

#[test]
fn reset_with_index_is_reproducible() -> Result<()> {
    let mut starts = vec![];
    for _ in 0..2 {
        let (mut env, sim) = build(config())?;
        let mut locations = vec![];
        for ix in 0..4 {
            env.reset_with_index(ix)?;
            let ego = env.actors().ids(ActorKind::Ego).next().expect("ego vehicle");
            locations.push(sim.transform(ego)?.location);
        }
        starts.push(locations);
    }
    assert_eq!(starts[0], starts[1]);
    Ok(())
}

#[test]
fn drop_releases_actors() -> Result<()> {
    let (mut env, sim) = build(pure_pursuit_config())?;
    env.reset()?;
    assert!(sim.alive_actor_count() > 0);
    drop(env);
    assert_eq!(sim.alive_actor_count(), 0);
    assert_eq!(sim.listening_count(), 0);
    Ok(())
}

#[test]
fn build_from_config() -> Result<()> {
    let config = config().action_mode(ActionMode::fixed_throttle()).seed(3);
    let mut env = Env::build(&config, 0)?;
    assert_eq!(
        env.action_space(),
        ActionSpace::Box {
            low: vec![-0.6],
            high: vec![0.6]
        }
    );
    assert_eq!(env.observation_space().shape, vec![16, 32, 3]);

    env.reset()?;
    let act = CarlaAct::FixedThrottle { steer: 0.0 };
    // The control of a step takes effect on the tick of the next one.
    let (step, _) = env.step(&act)?;
    assert_eq!(step.info.speed_kmh, 0.0);
    let (step, _) = env.step(&act)?;
    assert!(step.info.speed_kmh > 0.0);
    Ok(())
}

#[test]
fn negative_seed_is_rejected() -> Result<()> {
    let config = config();
    let sim = MockSimulator::connect(&config.world)?;
    assert!(CarlaEnv::with_simulator(sim.clone(), config.clone(), -1).is_err());
    assert!(CarlaEnv::with_simulator(sim, config.seed(5), -1).is_ok());
    Ok(())
}

struct Throttle;

impl Policy<Env> for Throttle {
    fn sample(&mut self, _obs: &drivegym_carla::CarlaObs) -> CarlaAct {
        FORWARD
    }
}

#[test]
fn default_evaluator() -> Result<()> {
    let env = build(config().steps_per_episode(5))?.0;
    let mut evaluator = DefaultEvaluator::with_env(env, 2)?;
    let record = evaluator.evaluate(&mut Throttle)?;
    assert_eq!(record.get_scalar("Episode length")?, 5.0);
    assert!(record.get_scalar("Episode return")? > 0.0);
    assert!(evaluator.env().actors().is_empty());
    Ok(())
}
