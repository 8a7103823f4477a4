//! Interfaces of the driving simulator consumed by [`CarlaEnv`](crate::CarlaEnv).
//!
//! The environment does not talk to a simulator process directly. It is generic over
//! [`Simulator`], whose methods follow the client API of CARLA: a world ticked in
//! synchronous mode, blueprints, actors that can be attached to each other, sensors
//! delivering data through callbacks, a traffic manager and a road network ([`RoadMap`]).
//!
//! Angles are in degrees and distances in meters, as in CARLA.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, ops::Add};

/// A point in the world.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance.
    pub fn distance(&self, other: &Location) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }

    /// Euclidean distance on the ground plane, ignoring `z`.
    pub fn planar_distance(&self, other: &Location) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl Add for Location {
    type Output = Location;

    fn add(self, rhs: Location) -> Location {
        Location::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

/// Orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

impl Rotation {
    pub fn new(pitch: f64, yaw: f64, roll: f64) -> Self {
        Self { pitch, yaw, roll }
    }
}

/// Location and orientation of an actor, absolute or relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub location: Location,
    #[serde(default)]
    pub rotation: Rotation,
}

impl Transform {
    pub fn new(location: Location, rotation: Rotation) -> Self {
        Self { location, rotation }
    }
}

/// A 3D vector, used for velocities, impulses and bounding box extents.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Length of the projection on the ground plane.
    pub fn planar_length(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Identifier of an actor in the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u32);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// How an actor follows its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentType {
    Rigid,

    /// Smoothed attachment, used for chase cameras.
    SpringArm,
}

/// Template from which actors are spawned, identified by strings like `sensor.camera.rgb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blueprint {
    id: String,
    attributes: BTreeMap<String, String>,
}

impl Blueprint {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl ToString) {
        self.attributes.insert(key.into(), value.to_string());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Control applied to a vehicle.
///
/// [`VehicleControl::new`] clamps throttle and brake to `[0, 1]` and steer to `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleControl {
    pub throttle: f64,
    pub steer: f64,
    pub brake: f64,
}

impl VehicleControl {
    pub fn new(throttle: f64, steer: f64, brake: f64) -> Self {
        Self {
            throttle: throttle.clamp(0.0, 1.0),
            steer: steer.clamp(-1.0, 1.0),
            brake: brake.clamp(0.0, 1.0),
        }
    }

    /// Pedals fully pressed, used to hold the vehicle while sensors settle.
    pub fn hold() -> Self {
        Self::new(1.0, 0.0, 1.0)
    }

    /// Everything released.
    pub fn release() -> Self {
        Self::default()
    }
}

/// An image delivered by a camera.
///
/// `raw_data` holds `height * width * channels` bytes in row-major order. CARLA
/// cameras deliver BGRA; semantic segmentation cameras store the class tag in the
/// third (red) channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraImage {
    pub frame: u64,
    pub width: usize,
    pub height: usize,
    pub raw_data: Vec<u8>,
}

/// Collision of the actor the sensor is attached to.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionEvent {
    /// Type id of the other actor, e.g. `vehicle.audi.a2` or `static.prop`.
    pub other_actor: String,
    pub normal_impulse: Vector3D,
}

impl CollisionEvent {
    /// Magnitude of the normal impulse.
    pub fn intensity(&self) -> f64 {
        self.normal_impulse.length()
    }
}

/// Type of a lane marking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LaneMarkingType {
    Other,
    Broken,
    Solid,
    SolidSolid,
    SolidBroken,
    BrokenSolid,
    BrokenBroken,
    BottsDots,
    Grass,
    Curb,
    NoMarking,
}

impl fmt::Display for LaneMarkingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Lane markings crossed by the actor the sensor is attached to.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneInvasionEvent {
    pub crossed_lane_markings: Vec<LaneMarkingType>,
}

impl LaneInvasionEvent {
    /// Distinct types of the crossed markings, in a stable order.
    pub fn labels(&self) -> Vec<String> {
        let mut types = self.crossed_lane_markings.clone();
        types.sort();
        types.dedup();
        types.iter().map(ToString::to_string).collect()
    }
}

/// Data delivered to a sensor callback.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorData {
    Image(CameraImage),
    Collision(CollisionEvent),
    LaneInvasion(LaneInvasionEvent),
}

/// Callback registered with [`Simulator::listen`].
///
/// It is invoked from the simulator's own execution context and must not block.
pub type SensorCallback = Box<dyn FnMut(SensorData) + Send>;

/// A point on the road network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub transform: Transform,
    pub road_id: u32,
    pub lane_id: i32,
}

/// Queries on the road network of the loaded map.
pub trait RoadMap {
    /// Name of the map, e.g. `Town03`.
    fn name(&self) -> &str;

    /// Recommended spawn points of vehicles.
    fn spawn_points(&self) -> Vec<Transform>;

    /// The waypoint at the center of the driving lane nearest to `location`.
    ///
    /// `None` if no driving lane exists near `location`.
    fn waypoint(&self, location: &Location) -> Option<Waypoint>;

    /// Waypoints approximately `distance` ahead of `waypoint`, one per reachable lane.
    ///
    /// Empty at the end of a road without successor.
    fn next(&self, waypoint: &Waypoint, distance: f64) -> Vec<Waypoint>;
}

/// Connection parameters and the map to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub host: String,
    pub port: u16,

    /// Name of the map.
    pub town: String,

    /// Simulated frames per second, the tick is `1 / fps` seconds.
    pub fps: f64,

    /// Timeout of requests to the simulator in milliseconds.
    pub timeout_ms: u64,

    /// Disables rendering of the world, sensors still produce images.
    pub no_rendering: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 2000,
            town: "Town02".to_string(),
            fps: 10.0,
            timeout_ms: 5000,
            no_rendering: true,
        }
    }
}

/// Settings of the world applied after connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldSettings {
    /// The world only advances on [`Simulator::tick`].
    pub synchronous_mode: bool,

    pub fixed_delta_seconds: Option<f64>,

    pub no_rendering_mode: bool,
}

/// Behavior of a vehicle driven by the traffic manager.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficBehavior {
    /// Desired speed in km/h.
    pub desired_speed: f64,

    /// Gap to keep to the leading vehicle, in meters.
    pub distance_to_leading_vehicle: f64,

    pub auto_lane_change: bool,

    /// Percentage of traffic lights ignored.
    pub ignore_lights_percentage: f64,

    /// Percentage of traffic signs ignored.
    pub ignore_signs_percentage: f64,

    /// Percentage of random lane changes, applied to both sides.
    pub random_lane_change_percentage: f64,
}

impl Default for TrafficBehavior {
    fn default() -> Self {
        Self {
            desired_speed: 20.0,
            distance_to_leading_vehicle: 3.0,
            auto_lane_change: false,
            ignore_lights_percentage: 0.0,
            ignore_signs_percentage: 0.0,
            random_lane_change_percentage: 0.0,
        }
    }
}

/// A driving simulator.
///
/// Methods taking an [`ActorId`] fail if the actor does not exist, except
/// [`Simulator::is_alive`] and [`Simulator::is_listening`].
pub trait Simulator {
    /// Road network of the loaded map.
    type Map: RoadMap;

    /// Connects to the simulator and loads the map named in `config`.
    fn connect(config: &WorldConfig) -> Result<Self>
    where
        Self: Sized;

    fn map(&self) -> &Self::Map;

    fn apply_settings(&mut self, settings: &WorldSettings) -> Result<()>;

    /// Advances the world by one frame and returns the frame number.
    ///
    /// Sensor data of the new frame is handed to the callbacks before this returns,
    /// or shortly after when the simulator delivers it asynchronously.
    fn tick(&mut self) -> Result<u64>;

    /// Looks up a blueprint by its id.
    fn find_blueprint(&self, id: &str) -> Result<Blueprint>;

    /// All blueprints of vehicles.
    fn vehicle_blueprints(&self) -> Vec<Blueprint>;

    /// Spawns an actor, optionally attached to `parent`.
    ///
    /// Fails if the spawn point is occupied or the simulator is busy. The failure
    /// is transient and the call can be retried.
    fn try_spawn_actor(
        &mut self,
        blueprint: &Blueprint,
        transform: &Transform,
        parent: Option<(ActorId, AttachmentType)>,
    ) -> Result<ActorId>;

    fn destroy_actor(&mut self, id: ActorId) -> Result<()>;

    fn is_alive(&self, id: ActorId) -> bool;

    /// Registers the callback of a sensor.
    fn listen(&mut self, id: ActorId, callback: SensorCallback) -> Result<()>;

    /// Unregisters the callback of a sensor.
    fn stop(&mut self, id: ActorId) -> Result<()>;

    fn is_listening(&self, id: ActorId) -> bool;

    fn apply_control(&mut self, id: ActorId, control: &VehicleControl) -> Result<()>;

    fn transform(&self, id: ActorId) -> Result<Transform>;

    /// Velocity in m/s.
    fn velocity(&self, id: ActorId) -> Result<Vector3D>;

    /// Half size of the bounding box of an actor.
    fn bounding_box_extent(&self, id: ActorId) -> Result<Vector3D>;

    fn set_spectator_transform(&mut self, transform: &Transform) -> Result<()>;

    /// Makes all vehicles of the traffic manager drive `percentage` percent slower
    /// than the speed limit.
    fn set_global_speed_difference(&mut self, percentage: f64) -> Result<()>;

    /// Hands a vehicle over to the traffic manager.
    fn set_autopilot(&mut self, id: ActorId, enabled: bool) -> Result<()>;

    fn configure_traffic(&mut self, id: ActorId, behavior: &TrafficBehavior) -> Result<()>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_control_is_clamped() {
        let c = VehicleControl::new(1.5, -2.0, -0.1);
        assert_eq!(c, VehicleControl::new(1.0, -1.0, 0.0));
    }

    #[test]
    fn test_lane_labels_are_distinct() {
        let event = LaneInvasionEvent {
            crossed_lane_markings: vec![
                LaneMarkingType::Solid,
                LaneMarkingType::Broken,
                LaneMarkingType::Solid,
            ],
        };
        assert_eq!(event.labels(), vec!["Broken", "Solid"]);
    }

    #[test]
    fn test_distances() {
        let a = Location::new(0.0, 0.0, 0.0);
        let b = Location::new(3.0, 4.0, 12.0);
        assert_eq!(a.distance(&b), 13.0);
        assert_eq!(a.planar_distance(&b), 5.0);
    }
}
