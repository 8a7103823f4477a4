//! A scripted in-process [`Simulator`].
//!
//! [`MockSimulator`] simulates a single straight road along the x axis. Vehicles
//! follow a simple kinematic model driven by the applied control, cameras deliver
//! a synthetic frame on every tick, and collisions and lane invasions can be injected.
//! An ego vehicle leaving its lane also produces a lane invasion.
//!
//! The simulator is a handle: clones share the same world, so a test can keep a clone
//! to inspect the world after handing the simulator to an environment.
use crate::sim::{
    ActorId, AttachmentType, Blueprint, CameraImage, CollisionEvent, LaneInvasionEvent,
    LaneMarkingType, Location, RoadMap, Rotation, SensorCallback, SensorData, Simulator,
    TrafficBehavior, Transform, Vector3D, VehicleControl, Waypoint, WorldConfig, WorldSettings,
};
use anyhow::{bail, Result};
use log::trace;
use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

const VEHICLE_BLUEPRINTS: [&str; 3] = [
    "vehicle.dodge.charger_2020",
    "vehicle.audi.a2",
    "vehicle.tesla.model3",
];

const SENSOR_BLUEPRINTS: [&str; 4] = [
    "sensor.camera.rgb",
    "sensor.camera.semantic_segmentation",
    "sensor.other.collision",
    "sensor.other.lane_invasion",
];

const WHEELBASE: f64 = 2.875;

/// Straight road along the x axis, centered on y = 0.
#[derive(Debug, Clone)]
pub struct MockMap {
    name: String,

    /// Start and end of the road.
    x_range: (f64, f64),

    lane_half_width: f64,
    n_spawn_points: usize,
    spawn_spacing: f64,
}

impl MockMap {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            x_range: (-100.0, 3000.0),
            lane_half_width: 1.75,
            n_spawn_points: 50,
            spawn_spacing: 15.0,
        }
    }

    fn on_road(&self, x: f64) -> bool {
        self.x_range.0 <= x && x <= self.x_range.1
    }

    /// Roads are 100 m long and numbered from 20.
    fn road_id(&self, x: f64) -> u32 {
        20 + ((x - self.x_range.0) / 100.0) as u32
    }
}

impl RoadMap for MockMap {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn_points(&self) -> Vec<Transform> {
        (0..self.n_spawn_points)
            .map(|i| {
                Transform::new(
                    Location::new(i as f64 * self.spawn_spacing, 0.0, 0.5),
                    Rotation::default(),
                )
            })
            .collect()
    }

    fn waypoint(&self, location: &Location) -> Option<Waypoint> {
        if !self.on_road(location.x) || location.y.abs() > 4.0 * self.lane_half_width {
            return None;
        }
        Some(Waypoint {
            transform: Transform::new(Location::new(location.x, 0.0, 0.0), Rotation::default()),
            road_id: self.road_id(location.x),
            lane_id: -1,
        })
    }

    fn next(&self, waypoint: &Waypoint, distance: f64) -> Vec<Waypoint> {
        let x = waypoint.transform.location.x + distance;
        self.waypoint(&Location::new(x, 0.0, 0.0))
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Vehicle,
    Camera { semantic: bool },
    Collision,
    LaneInvasion,
}

struct Actor {
    role: Role,
    blueprint: Blueprint,

    /// Relative to the parent if attached.
    transform: Transform,
    parent: Option<ActorId>,

    speed: f64,
    control: VehicleControl,
    autopilot: bool,
    ticks: u64,
}

impl Actor {
    fn velocity(&self) -> Vector3D {
        let yaw = self.transform.rotation.yaw.to_radians();
        Vector3D::new(self.speed * yaw.cos(), self.speed * yaw.sin(), 0.0)
    }
}

struct World {
    frame: u64,
    delta_seconds: f64,
    settings: Option<WorldSettings>,
    next_id: u32,
    actors: BTreeMap<ActorId, Actor>,
    callbacks: BTreeMap<ActorId, SensorCallback>,
    pending_collisions: Vec<CollisionEvent>,
    pending_lane_invasions: Vec<LaneInvasionEvent>,
    blocked_blueprints: HashSet<String>,
    failing_spawns: usize,
    camera_warmup: u64,
    spectator: Option<Transform>,
    global_speed_difference: f64,
    traffic_behaviors: BTreeMap<ActorId, TrafficBehavior>,
}

impl World {
    fn new(fps: f64) -> Self {
        Self {
            frame: 0,
            delta_seconds: 1.0 / fps,
            settings: None,
            next_id: 1,
            actors: BTreeMap::new(),
            callbacks: BTreeMap::new(),
            pending_collisions: vec![],
            pending_lane_invasions: vec![],
            blocked_blueprints: HashSet::new(),
            failing_spawns: 0,
            camera_warmup: 0,
            spectator: None,
            global_speed_difference: 0.0,
            traffic_behaviors: BTreeMap::new(),
        }
    }

    fn actor(&self, id: ActorId) -> Result<&Actor> {
        match self.actors.get(&id) {
            Some(actor) => Ok(actor),
            None => bail!("Actor {} does not exist", id),
        }
    }

    fn actor_mut(&mut self, id: ActorId) -> Result<&mut Actor> {
        match self.actors.get_mut(&id) {
            Some(actor) => Ok(actor),
            None => bail!("Actor {} does not exist", id),
        }
    }

    fn absolute_transform(&self, id: ActorId) -> Result<Transform> {
        let actor = self.actor(id)?;
        match actor.parent {
            Some(parent) => {
                let parent = self.absolute_transform(parent)?;
                Ok(Transform::new(
                    parent.location + actor.transform.location,
                    actor.transform.rotation,
                ))
            }
            None => Ok(actor.transform),
        }
    }

    /// Moves manually driven vehicles, returns ids of those which left or entered the lane.
    fn drive(&mut self, map: &MockMap) -> Vec<ActorId> {
        let dt = self.delta_seconds;
        let mut crossed = vec![];
        for (id, actor) in self.actors.iter_mut() {
            if actor.role != Role::Vehicle || actor.autopilot {
                continue;
            }
            let c = actor.control;
            let accel = 4.0 * c.throttle - 8.0 * c.brake - 0.2 * actor.speed;
            actor.speed = (actor.speed + accel * dt).max(0.0);

            let yaw_rate = actor.speed / WHEELBASE * (0.6 * c.steer).tan();
            let rotation = &mut actor.transform.rotation;
            rotation.yaw += yaw_rate.to_degrees() * dt;
            let yaw = rotation.yaw.to_radians();

            let location = &mut actor.transform.location;
            let was_in_lane = location.y.abs() <= map.lane_half_width;
            location.x += actor.speed * yaw.cos() * dt;
            location.y += actor.speed * yaw.sin() * dt;
            if was_in_lane != (location.y.abs() <= map.lane_half_width) {
                crossed.push(*id);
            }
        }
        crossed
    }

    fn camera_image(&self, actor: &Actor, semantic: bool) -> CameraImage {
        let size = |key: &str| {
            actor
                .blueprint
                .attribute(key)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(800)
        };
        let (width, height) = (size("image_size_x"), size("image_size_y"));
        let mut raw_data = Vec::with_capacity(width * height * 4);
        for i in 0..height {
            for j in 0..width {
                if semantic {
                    // Sky above the horizon, road below.
                    let tag = if 2 * i >= height { 7 } else { 11 };
                    raw_data.extend_from_slice(&[0, 0, tag, 255]);
                } else {
                    let shade = (self.frame as usize + i + j) % 256;
                    raw_data.extend_from_slice(&[shade as u8, (i % 256) as u8, (j % 256) as u8, 255]);
                }
            }
        }
        CameraImage {
            frame: self.frame,
            width,
            height,
            raw_data,
        }
    }

    fn deliver(&mut self, crossed: &[ActorId]) {
        let collisions = std::mem::take(&mut self.pending_collisions);
        let mut lane_invasions = std::mem::take(&mut self.pending_lane_invasions);
        for id in crossed {
            trace!("Vehicle {} crossed a lane marking", id);
            lane_invasions.push(LaneInvasionEvent {
                crossed_lane_markings: vec![LaneMarkingType::Broken],
            });
        }

        for actor in self.actors.values_mut() {
            actor.ticks += 1;
        }

        let mut data: Vec<(ActorId, SensorData)> = vec![];
        for (id, actor) in self.actors.iter() {
            if !self.callbacks.contains_key(id) {
                continue;
            }
            match actor.role {
                Role::Camera { semantic } if actor.ticks > self.camera_warmup => {
                    data.push((*id, SensorData::Image(self.camera_image(actor, semantic))));
                }
                Role::Collision => data.extend(
                    collisions
                        .iter()
                        .map(|e| (*id, SensorData::Collision(e.clone()))),
                ),
                Role::LaneInvasion => data.extend(
                    lane_invasions
                        .iter()
                        .map(|e| (*id, SensorData::LaneInvasion(e.clone()))),
                ),
                _ => {}
            }
        }

        for (id, data) in data {
            if let Some(callback) = self.callbacks.get_mut(&id) {
                callback(data);
            }
        }
    }
}

/// In-process simulator of a straight road.
#[derive(Clone)]
pub struct MockSimulator {
    world: Arc<Mutex<World>>,
    map: Arc<MockMap>,
}

impl MockSimulator {
    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of actors in the world.
    pub fn alive_actor_count(&self) -> usize {
        self.world().actors.len()
    }

    /// Number of sensors with a registered callback.
    pub fn listening_count(&self) -> usize {
        self.world().callbacks.len()
    }

    /// Number of vehicles driven by the traffic manager.
    pub fn autopilot_count(&self) -> usize {
        self.world().actors.values().filter(|a| a.autopilot).count()
    }

    /// Number of the last frame.
    pub fn frame(&self) -> u64 {
        self.world().frame
    }

    pub fn settings(&self) -> Option<WorldSettings> {
        self.world().settings
    }

    pub fn spectator(&self) -> Option<Transform> {
        self.world().spectator
    }

    pub fn global_speed_difference(&self) -> f64 {
        self.world().global_speed_difference
    }

    /// Last control applied to a vehicle.
    pub fn control(&self, id: ActorId) -> Option<VehicleControl> {
        self.world().actors.get(&id).map(|a| a.control)
    }

    /// Attributes of the blueprint an actor was spawned from.
    pub fn blueprint_of(&self, id: ActorId) -> Option<Blueprint> {
        self.world().actors.get(&id).map(|a| a.blueprint.clone())
    }

    /// Delivers a collision to all collision sensors on the next tick.
    pub fn inject_collision(&self, other_actor: &str, normal_impulse: Vector3D) {
        self.world().pending_collisions.push(CollisionEvent {
            other_actor: other_actor.to_string(),
            normal_impulse,
        });
    }

    /// Delivers a lane invasion to all lane invasion sensors on the next tick.
    pub fn inject_lane_invasion(&self, crossed_lane_markings: Vec<LaneMarkingType>) {
        self.world()
            .pending_lane_invasions
            .push(LaneInvasionEvent {
                crossed_lane_markings,
            });
    }

    /// Makes every spawn of a blueprint fail.
    pub fn block_spawns(&self, blueprint_id: &str) {
        self.world()
            .blocked_blueprints
            .insert(blueprint_id.to_string());
    }

    /// Makes the next `n` spawns fail, whatever the blueprint.
    pub fn fail_next_spawns(&self, n: usize) {
        self.world().failing_spawns = n;
    }

    /// Cameras deliver their first frame only after `ticks` ticks.
    pub fn set_camera_warmup(&self, ticks: u64) {
        self.world().camera_warmup = ticks;
    }
}

impl Simulator for MockSimulator {
    type Map = MockMap;

    fn connect(config: &WorldConfig) -> Result<Self> {
        Ok(Self {
            world: Arc::new(Mutex::new(World::new(config.fps))),
            map: Arc::new(MockMap::new(config.town.clone())),
        })
    }

    fn map(&self) -> &Self::Map {
        &self.map
    }

    fn apply_settings(&mut self, settings: &WorldSettings) -> Result<()> {
        let mut world = self.world();
        if let Some(dt) = settings.fixed_delta_seconds {
            world.delta_seconds = dt;
        }
        world.settings = Some(*settings);
        Ok(())
    }

    fn tick(&mut self) -> Result<u64> {
        let mut world = self.world();
        world.frame += 1;
        let crossed = world.drive(&self.map);
        world.deliver(&crossed);
        Ok(world.frame)
    }

    fn find_blueprint(&self, id: &str) -> Result<Blueprint> {
        if VEHICLE_BLUEPRINTS.contains(&id) || SENSOR_BLUEPRINTS.contains(&id) {
            Ok(Blueprint::new(id))
        } else {
            bail!("Blueprint {} not found", id)
        }
    }

    fn vehicle_blueprints(&self) -> Vec<Blueprint> {
        VEHICLE_BLUEPRINTS.iter().map(|id| Blueprint::new(*id)).collect()
    }

    fn try_spawn_actor(
        &mut self,
        blueprint: &Blueprint,
        transform: &Transform,
        parent: Option<(ActorId, AttachmentType)>,
    ) -> Result<ActorId> {
        let mut world = self.world();
        if world.failing_spawns > 0 {
            world.failing_spawns -= 1;
            bail!("Spawn of {} failed", blueprint.id());
        }
        if world.blocked_blueprints.contains(blueprint.id()) {
            bail!("Spawn of {} failed", blueprint.id());
        }

        let role = match blueprint.id() {
            "sensor.camera.rgb" => Role::Camera { semantic: false },
            "sensor.camera.semantic_segmentation" => Role::Camera { semantic: true },
            "sensor.other.collision" => Role::Collision,
            "sensor.other.lane_invasion" => Role::LaneInvasion,
            _ => Role::Vehicle,
        };
        if let Some((parent, _)) = parent {
            world.actor(parent)?;
        }
        if role == Role::Vehicle && parent.is_none() {
            let occupied = world.actors.values().any(|a| {
                a.role == Role::Vehicle && a.transform.location.distance(&transform.location) < 5.0
            });
            if occupied {
                bail!("Spawn point {:?} is occupied", transform.location);
            }
        }

        let id = ActorId(world.next_id);
        world.next_id += 1;
        world.actors.insert(
            id,
            Actor {
                role,
                blueprint: blueprint.clone(),
                transform: *transform,
                parent: parent.map(|(p, _)| p),
                speed: 0.0,
                control: VehicleControl::default(),
                autopilot: false,
                ticks: 0,
            },
        );
        Ok(id)
    }

    fn destroy_actor(&mut self, id: ActorId) -> Result<()> {
        let mut world = self.world();
        if world.actors.remove(&id).is_none() {
            bail!("Actor {} does not exist", id);
        }
        world.callbacks.remove(&id);
        world.traffic_behaviors.remove(&id);
        Ok(())
    }

    fn is_alive(&self, id: ActorId) -> bool {
        self.world().actors.contains_key(&id)
    }

    fn listen(&mut self, id: ActorId, callback: SensorCallback) -> Result<()> {
        let mut world = self.world();
        if world.actor(id)?.role == Role::Vehicle {
            bail!("Actor {} is not a sensor", id);
        }
        world.callbacks.insert(id, callback);
        Ok(())
    }

    fn stop(&mut self, id: ActorId) -> Result<()> {
        let mut world = self.world();
        world.actor(id)?;
        world.callbacks.remove(&id);
        Ok(())
    }

    fn is_listening(&self, id: ActorId) -> bool {
        self.world().callbacks.contains_key(&id)
    }

    fn apply_control(&mut self, id: ActorId, control: &VehicleControl) -> Result<()> {
        self.world().actor_mut(id)?.control = *control;
        Ok(())
    }

    fn transform(&self, id: ActorId) -> Result<Transform> {
        self.world().absolute_transform(id)
    }

    fn velocity(&self, id: ActorId) -> Result<Vector3D> {
        let world = self.world();
        let mut actor = world.actor(id)?;
        while let Some(parent) = actor.parent {
            actor = world.actor(parent)?;
        }
        Ok(actor.velocity())
    }

    fn bounding_box_extent(&self, id: ActorId) -> Result<Vector3D> {
        match self.world().actor(id)?.role {
            Role::Vehicle => Ok(Vector3D::new(2.4, 1.0, 0.75)),
            _ => Ok(Vector3D::default()),
        }
    }

    fn set_spectator_transform(&mut self, transform: &Transform) -> Result<()> {
        self.world().spectator = Some(*transform);
        Ok(())
    }

    fn set_global_speed_difference(&mut self, percentage: f64) -> Result<()> {
        self.world().global_speed_difference = percentage;
        Ok(())
    }

    fn set_autopilot(&mut self, id: ActorId, enabled: bool) -> Result<()> {
        self.world().actor_mut(id)?.autopilot = enabled;
        Ok(())
    }

    fn configure_traffic(&mut self, id: ActorId, behavior: &TrafficBehavior) -> Result<()> {
        let mut world = self.world();
        world.actor(id)?;
        world.traffic_behaviors.insert(id, *behavior);
        Ok(())
    }
}
