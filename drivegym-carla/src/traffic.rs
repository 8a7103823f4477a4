//! Background vehicles driven by the traffic manager.
use crate::sim::{ActorId, RoadMap, Simulator, TrafficBehavior};
use anyhow::Result;
use log::{debug, trace};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

/// Configuration of background traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Number of vehicles spawned per episode. Occupied spawn points reduce the number.
    pub n_vehicles: usize,

    /// Percentage by which all traffic drives slower than the speed limit.
    pub global_speed_difference: f64,

    pub behavior: TrafficBehavior,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            n_vehicles: 30,
            global_speed_difference: 60.0,
            behavior: TrafficBehavior::default(),
        }
    }
}

/// Spawns vehicles at random spawn points and hands them to the traffic manager.
///
/// Vehicles that can not be spawned or configured are skipped. Returns the ids of the
/// vehicles spawned, including those whose configuration failed.
pub fn spawn_traffic<S, R>(sim: &mut S, rng: &mut R, config: &TrafficConfig) -> Vec<ActorId>
where
    S: Simulator,
    R: Rng,
{
    let spawn_points = sim.map().spawn_points();
    let blueprints = sim.vehicle_blueprints();
    let mut vehicles = Vec::with_capacity(config.n_vehicles);

    for _ in 0..config.n_vehicles {
        let (transform, blueprint) = match (spawn_points.choose(rng), blueprints.choose(rng)) {
            (Some(t), Some(b)) => (t, b),
            _ => break,
        };
        let id = match sim.try_spawn_actor(blueprint, transform, None) {
            Ok(id) => id,
            Err(e) => {
                trace!("Skipped a traffic vehicle: {}", e);
                continue;
            }
        };
        vehicles.push(id);
        if let Err(e) = autopilot(sim, id, &config.behavior) {
            debug!("Failed to configure traffic vehicle {}: {}", id, e);
        }
    }

    debug!("Spawned {} traffic vehicles", vehicles.len());
    vehicles
}

fn autopilot<S: Simulator>(sim: &mut S, id: ActorId, behavior: &TrafficBehavior) -> Result<()> {
    sim.set_autopilot(id, true)?;
    sim.configure_traffic(id, behavior)
}
