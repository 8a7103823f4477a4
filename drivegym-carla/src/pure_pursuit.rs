//! Pure pursuit lateral controller.
//!
//! The controller steers the vehicle toward a target point on the lane ahead. On every
//! invocation the path is derived again from the road network: the vehicle location
//! is projected onto the driving lane and followed forward in steps of
//! [`PurePursuitConfig::waypoint_spacing`] meters. The target is the waypoint
//! [`PurePursuitConfig::target_offset`] positions after the one nearest to the
//! vehicle. With `alpha` the angle between the heading of the vehicle and the
//! direction to the target, and `ld` the lookahead distance, the steering value is
//!
//! ```text
//! delta = atan2(2 L sin(alpha), ld)
//! ```
//!
//! clipped to `[-1, 1]`, where `L` is the wheelbase.
use crate::sim::{Location, RoadMap, Transform, Vector3D};
use log::trace;
use serde::{Deserialize, Serialize};

/// Constants of [`PurePursuit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurePursuitConfig {
    /// Distance between the front and rear axles in meters.
    pub wheelbase: f64,

    /// Gain of the lookahead distance on the forward speed.
    pub lookahead_gain: f64,

    /// Lower clip of the forward speed in m/s.
    pub min_speed: f64,

    /// Upper clip of the forward speed in m/s.
    pub max_speed: f64,

    pub n_waypoints: usize,

    /// Distance between consecutive waypoints in meters.
    pub waypoint_spacing: f64,

    /// Offset of the target from the nearest waypoint.
    pub target_offset: usize,
}

impl Default for PurePursuitConfig {
    fn default() -> Self {
        Self {
            wheelbase: 2.875,
            lookahead_gain: 4.0,
            min_speed: 0.1,
            max_speed: 2.5,
            n_waypoints: 300,
            waypoint_spacing: 2.0,
            target_offset: 4,
        }
    }
}

/// Pure pursuit controller.
///
/// Keeps the last valid heading error and steering value, which are returned when the
/// computation degenerates. Both are cleared by [`PurePursuit::reset`].
#[derive(Debug, Clone)]
pub struct PurePursuit {
    config: PurePursuitConfig,
    prev_alpha: f64,
    prev_steer: f64,
}

impl PurePursuit {
    pub fn new(config: PurePursuitConfig) -> Self {
        Self {
            config,
            prev_alpha: 0.0,
            prev_steer: 0.0,
        }
    }

    pub fn config(&self) -> &PurePursuitConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.prev_alpha = 0.0;
        self.prev_steer = 0.0;
    }

    /// Steering value for a vehicle at `transform` moving with `velocity`.
    pub fn steer<M: RoadMap>(&mut self, map: &M, transform: &Transform, velocity: &Vector3D) -> f64 {
        let path = self.path(map, &transform.location);
        let target = match target_point(&path, &transform.location, self.config.target_offset) {
            Some(target) => target,
            None => {
                trace!("No path ahead of the vehicle, keeping steer {}", self.prev_steer);
                return self.prev_steer;
            }
        };

        // `clamp` panics on swapped bounds.
        let vf = velocity
            .planar_length()
            .max(self.config.min_speed)
            .min(self.config.max_speed);
        let ld = self.config.lookahead_gain * vf;

        let alpha = heading_error(transform, &target);
        let alpha = if alpha.is_nan() {
            trace!("Heading error is NaN, using {}", self.prev_alpha);
            self.prev_alpha
        } else {
            self.prev_alpha = alpha;
            alpha
        };

        self.steering_angle(alpha, ld)
    }

    /// Waypoints ahead of `location`, shorter than configured at the end of a road.
    fn path<M: RoadMap>(&self, map: &M, location: &Location) -> Vec<Location> {
        let mut path = Vec::with_capacity(self.config.n_waypoints);
        let mut wp = match map.waypoint(location) {
            Some(wp) => wp,
            None => return path,
        };
        for _ in 0..self.config.n_waypoints {
            wp = match map.next(&wp, self.config.waypoint_spacing).first() {
                Some(next) => *next,
                None => break,
            };
            path.push(wp.transform.location);
        }
        path
    }

    /// `atan2(2 L sin(alpha), ld)` clipped to `[-1, 1]`, or the previous value if NaN.
    fn steering_angle(&mut self, alpha: f64, ld: f64) -> f64 {
        let delta = (2.0 * self.config.wheelbase * alpha.sin()).atan2(ld);
        if delta.is_nan() {
            trace!("Steering angle is NaN, using {}", self.prev_steer);
            return self.prev_steer;
        }
        self.prev_steer = delta.clamp(-1.0, 1.0);
        self.prev_steer
    }
}

/// The waypoint `offset` positions after the one nearest to `location` on the plane,
/// clamped to the end of the path.
fn target_point(path: &[Location], location: &Location, offset: usize) -> Option<Location> {
    let nearest = path
        .iter()
        .enumerate()
        .map(|(i, wp)| (i, wp.planar_distance(location)))
        .min_by(|(_, a), (_, b)| a.total_cmp(b))?
        .0;
    let ix = nearest.saturating_add(offset).min(path.len() - 1);
    Some(path[ix])
}

/// Angle in radians from the heading of the vehicle to `target`.
fn heading_error(transform: &Transform, target: &Location) -> f64 {
    let Location { x, y, .. } = transform.location;
    (target.y - y).atan2(target.x - x) - transform.rotation.yaw.to_radians()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{Rotation, Waypoint};

    /// A road along the x axis from x = 0 to x = `length`.
    struct StraightRoad {
        length: f64,
    }

    impl RoadMap for StraightRoad {
        fn name(&self) -> &str {
            "Straight"
        }

        fn spawn_points(&self) -> Vec<Transform> {
            vec![Transform::default()]
        }

        fn waypoint(&self, location: &Location) -> Option<Waypoint> {
            if location.x < 0.0 || location.x > self.length {
                return None;
            }
            Some(Waypoint {
                transform: Transform::new(Location::new(location.x, 0.0, 0.0), Rotation::default()),
                road_id: 1,
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

    fn pose(x: f64, y: f64, yaw: f64) -> Transform {
        Transform::new(Location::new(x, y, 0.0), Rotation::new(0.0, yaw, 0.0))
    }

    #[test]
    fn test_centered_vehicle_goes_straight() {
        let map = StraightRoad { length: 1000.0 };
        let mut pp = PurePursuit::new(PurePursuitConfig::default());
        let steer = pp.steer(&map, &pose(10.0, 0.0, 0.0), &Vector3D::new(2.0, 0.0, 0.0));
        assert!(steer.abs() < 1e-9);
    }

    #[test]
    fn test_steers_back_to_lane() {
        let map = StraightRoad { length: 1000.0 };
        let mut pp = PurePursuit::new(PurePursuitConfig::default());

        // Left of the lane (positive y), the target is to the right: negative angle.
        let steer = pp.steer(&map, &pose(10.0, 2.0, 0.0), &Vector3D::default());
        assert!(steer < 0.0);
        let steer = pp.steer(&map, &pose(10.0, -2.0, 0.0), &Vector3D::default());
        assert!(steer > 0.0);
    }

    #[test]
    fn test_steer_is_bounded() {
        let mut pp = PurePursuit::new(PurePursuitConfig::default());
        for i in -50..=50 {
            let alpha = i as f64 * 0.13;
            for ld in [0.4, 1.0, 10.0] {
                let delta = pp.steering_angle(alpha, ld);
                assert!((-1.0..=1.0).contains(&delta), "alpha {} ld {}", alpha, ld);
            }
        }
    }

    #[test]
    fn test_nan_keeps_previous_value() {
        let mut pp = PurePursuit::new(PurePursuitConfig::default());
        let delta = pp.steering_angle(0.3, 4.0);
        assert_eq!(pp.steering_angle(f64::NAN, 4.0), delta);
        assert_eq!(pp.steering_angle(0.3, f64::NAN), delta);

        pp.reset();
        assert_eq!(pp.steering_angle(f64::NAN, 4.0), 0.0);
    }

    #[test]
    fn test_target_is_clamped_to_path_end() {
        let path: Vec<_> = (0..6).map(|i| Location::new(i as f64, 0.0, 0.0)).collect();
        let target = target_point(&path, &Location::new(0.1, 0.0, 0.0), 4).unwrap();
        assert_eq!(target.x, 4.0);
        let target = target_point(&path, &Location::new(3.9, 0.0, 0.0), 4).unwrap();
        assert_eq!(target.x, 5.0);
        assert!(target_point(&[], &Location::default(), 4).is_none());
    }

    #[test]
    fn test_no_road_keeps_previous_value() {
        let map = StraightRoad { length: 100.0 };
        let mut pp = PurePursuit::new(PurePursuitConfig::default());
        let steer = pp.steer(&map, &pose(10.0, 2.0, 0.0), &Vector3D::default());
        assert_eq!(pp.steer(&map, &pose(-20.0, 0.0, 0.0), &Vector3D::default()), steer);

        // At the end of the road the path is empty.
        assert_eq!(pp.steer(&map, &pose(100.0, 0.0, 0.0), &Vector3D::default()), steer);
    }
    #[test]
    fn test_nan_heading_keeps_previous_alpha() {
        let map = StraightRoad { length: 1000.0 };
        let mut pp = PurePursuit::new(PurePursuitConfig::default());
        let velocity = Vector3D::new(1.0, 0.0, 0.0);
        let steer = pp.steer(&map, &pose(10.0, 2.0, 0.0), &velocity);
        assert!(steer < 0.0);

        // The steer is recomputed from the previous heading error, not the previous steer.
        let steer_nan = pp.steer(&map, &pose(10.0, 2.0, f64::NAN), &velocity);
        assert!(steer_nan.is_finite());
        assert_eq!(steer_nan, steer);

        let faster = pp.steer(&map, &pose(10.0, 2.0, f64::NAN), &Vector3D::new(2.5, 0.0, 0.0));
        assert!(faster.is_finite());
        assert!(faster > steer);
    }

    #[test]
    fn test_degenerate_config_does_not_panic() -> anyhow::Result<()> {
        let yaml = "min_speed: 3.0\nmax_speed: 2.5\ntarget_offset: 18446744073709551615\n";
        let config: PurePursuitConfig = serde_yaml::from_str(yaml)?;
        let map = StraightRoad { length: 1000.0 };
        let mut pp = PurePursuit::new(config);
        let steer = pp.steer(&map, &pose(10.0, 2.0, 0.0), &Vector3D::new(1.0, 0.0, 0.0));
        assert!((-1.0..=1.0).contains(&steer));
        assert!(steer < 0.0);
        Ok(())
    }
}
