//! Where the ego vehicle is spawned at the beginning of an episode.
use crate::{
    error::CarlaEnvError,
    sim::{Location, RoadMap, Rotation, Transform},
};
use anyhow::Result;
use log::trace;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

/// Strategy choosing the start pose of the ego vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartPose {
    /// A spawn point of the map, chosen uniformly.
    Random,

    /// A random spawn point on a road whose id is in `min_road_id..=max_road_id`.
    ///
    /// At most `trials` spawn points are drawn; if none of them is on such a road, the
    /// last one is used.
    Highway {
        #[serde(default = "highway_trials")]
        trials: usize,
        #[serde(default = "highway_min_road_id")]
        min_road_id: u32,
        #[serde(default = "highway_max_road_id")]
        max_road_id: u32,

        /// Map the road ids refer to. Other maps are rejected if given.
        #[serde(default = "highway_map")]
        map: Option<String>,
    },

    /// A fixed pose.
    Custom {
        #[serde(default = "custom_transform")]
        transform: Transform,
    },

    /// The waypoint nearest to a fixed location of a given map.
    MapWaypoint {
        #[serde(default = "map_waypoint_map")]
        map: String,
        #[serde(default = "map_waypoint_location")]
        location: Location,
    },
}

fn highway_trials() -> usize {
    10
}

fn highway_min_road_id() -> u32 {
    15
}

fn highway_max_road_id() -> u32 {
    89
}

fn highway_map() -> Option<String> {
    Some("Town03".to_string())
}

fn custom_transform() -> Transform {
    Transform::new(Location::new(-7.0, 285.0, 1.85), Rotation::new(0.0, 90.0, 0.0))
}

fn map_waypoint_map() -> String {
    "Town02".to_string()
}

fn map_waypoint_location() -> Location {
    Location::new(180.0, -2.0, 1.0)
}

impl Default for StartPose {
    fn default() -> Self {
        Self::Random
    }
}

impl StartPose {
    /// Highway strategy with road ids `15..=89` of Town03.
    pub fn highway() -> Self {
        Self::Highway {
            trials: highway_trials(),
            min_road_id: highway_min_road_id(),
            max_road_id: highway_max_road_id(),
            map: highway_map(),
        }
    }

    pub fn custom() -> Self {
        Self::Custom {
            transform: custom_transform(),
        }
    }

    pub fn map_waypoint() -> Self {
        Self::MapWaypoint {
            map: map_waypoint_map(),
            location: map_waypoint_location(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Highway { .. } => "highway",
            Self::Custom { .. } => "custom",
            Self::MapWaypoint { .. } => "map_waypoint",
        }
    }

    /// Chooses a start pose on `map`.
    pub fn choose<M: RoadMap, R: Rng>(&self, map: &M, rng: &mut R) -> Result<Transform> {
        match self {
            Self::Random => random_spawn_point(map, rng),
            Self::Highway {
                trials,
                min_road_id,
                max_road_id,
                map: only,
            } => {
                self.check_map(map, only.as_deref())?;
                let roads = *min_road_id..=*max_road_id;
                let mut candidate = random_spawn_point(map, rng)?;
                for trial in 1..*trials {
                    match map.waypoint(&candidate.location) {
                        Some(wp) if roads.contains(&wp.road_id) => break,
                        _ => trace!("Spawn point {} is not on a highway", trial),
                    }
                    candidate = random_spawn_point(map, rng)?;
                }
                Ok(candidate)
            }
            Self::Custom { transform } => Ok(*transform),
            Self::MapWaypoint { map: only, location } => {
                self.check_map(map, Some(only))?;
                map.waypoint(location)
                    .map(|wp| wp.transform)
                    .ok_or_else(|| {
                        CarlaEnvError::NoRoadAtStart {
                            x: location.x,
                            y: location.y,
                        }
                        .into()
                    })
            }
        }
    }

    fn check_map<M: RoadMap>(&self, map: &M, only: Option<&str>) -> Result<()> {
        match only {
            Some(name) if name != map.name() => Err(CarlaEnvError::UnsupportedMap {
                strategy: self.name(),
                map: map.name().to_string(),
            }
            .into()),
            _ => Ok(()),
        }
    }
}

fn random_spawn_point<M: RoadMap, R: Rng>(map: &M, rng: &mut R) -> Result<Transform> {
    map.spawn_points()
        .choose(rng)
        .copied()
        .ok_or_else(|| CarlaEnvError::NoSpawnPoints(map.name().to_string()).into())
}
