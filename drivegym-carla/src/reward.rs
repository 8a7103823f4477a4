//! Reward and termination of a transition.
use crate::sensor::EventHistory;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    Collision,
    LaneInvasion,

    /// `steps_per_episode` transitions were made. This is a truncation.
    StepLimit,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Collision => "collision",
            Self::LaneInvasion => "lane_invasion",
            Self::StepLimit => "step_limit",
        };
        f.write_str(s)
    }
}

/// Result of [`RewardEvaluator::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub reward: f64,
    pub is_terminated: bool,
    pub is_truncated: bool,
    pub cause: Option<TerminationCause>,
}

impl Evaluation {
    pub fn is_done(&self) -> bool {
        self.is_terminated || self.is_truncated
    }
}

/// Computes rewards from the event history and the distance from the start point.
///
/// The reward of a transition is `d_now² - d_prev²`, where `d` is the distance of the
/// vehicle from its start point, minus a penalty if the episode fails:
///
/// * a collision always ends the episode,
/// * a lane invasion ends it unless `tolerate_lane_invasions` is set,
///
/// and both histories are cleared on failure. Reaching `steps_per_episode` transitions
/// truncates the episode.
#[derive(Debug, Clone)]
pub struct RewardEvaluator {
    penalty: f64,
    tolerate_lane_invasions: bool,
    steps_per_episode: usize,
}

impl RewardEvaluator {
    pub fn new(steps_per_episode: usize, tolerate_lane_invasions: bool) -> Self {
        Self {
            penalty: 100.0,
            tolerate_lane_invasions,
            steps_per_episode,
        }
    }

    pub fn evaluate(
        &self,
        history: &mut EventHistory,
        prev_dist: f64,
        now_dist: f64,
        frame_step: usize,
    ) -> Evaluation {
        history.collect();

        let mut reward = 0.0;
        let mut cause = None;

        if !history.collisions.is_empty() {
            debug!("Collision: {:?}", history.collisions.entries());
            cause = Some(TerminationCause::Collision);
        } else if !history.lane_invasions.is_empty() {
            if self.tolerate_lane_invasions {
                trace!("Ignored lane invasion: {:?}", history.lane_invasions.entries());
                history.lane_invasions.clear();
            } else {
                debug!("Lane invasion: {:?}", history.lane_invasions.entries());
                cause = Some(TerminationCause::LaneInvasion);
            }
        }
        if cause.is_some() {
            reward -= self.penalty;
            history.clear();
        }

        reward += now_dist.powi(2) - prev_dist.powi(2);

        let is_terminated = cause.is_some();
        let is_truncated = frame_step >= self.steps_per_episode;
        if !is_terminated && is_truncated {
            cause = Some(TerminationCause::StepLimit);
        }

        Evaluation {
            reward,
            is_terminated,
            is_truncated,
            cause,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{CollisionEvent, LaneInvasionEvent, LaneMarkingType, SensorData, Vector3D};

    fn collide(history: &EventHistory) {
        let mut callback = history.collision_callback();
        callback(SensorData::Collision(CollisionEvent {
            other_actor: "static.prop".to_string(),
            normal_impulse: Vector3D::new(0.0, 0.0, 1000.0),
        }));
    }

    fn cross_lane(history: &EventHistory) {
        let mut callback = history.lane_invasion_callback();
        callback(SensorData::LaneInvasion(LaneInvasionEvent {
            crossed_lane_markings: vec![LaneMarkingType::Broken],
        }));
    }

    #[test]
    fn test_progress_only() {
        let evaluator = RewardEvaluator::new(100, false);
        let mut history = EventHistory::new();

        let e = evaluator.evaluate(&mut history, 3.0, 3.0, 1);
        assert_eq!(e.reward, 0.0);
        assert!(!e.is_done());

        let e = evaluator.evaluate(&mut history, 2.0, 3.0, 2);
        assert_eq!(e.reward, 5.0);
        assert_eq!(e.cause, None);
    }

    #[test]
    fn test_collision_in_every_mode() {
        for tolerate in [false, true] {
            let evaluator = RewardEvaluator::new(100, tolerate);
            let mut history = EventHistory::new();
            collide(&history);
            cross_lane(&history);

            let e = evaluator.evaluate(&mut history, 1.0, 2.0, 10);
            assert_eq!(e.reward, -100.0 + 3.0);
            assert!(e.is_terminated);
            assert_eq!(e.cause, Some(TerminationCause::Collision));
            assert!(history.collisions.is_empty());
            assert!(history.lane_invasions.is_empty());
        }
    }

    #[test]
    fn test_lane_invasion() {
        let evaluator = RewardEvaluator::new(100, false);
        let mut history = EventHistory::new();
        cross_lane(&history);
        let e = evaluator.evaluate(&mut history, 0.0, 0.0, 1);
        assert_eq!(e.reward, -100.0);
        assert_eq!(e.cause, Some(TerminationCause::LaneInvasion));

        let evaluator = RewardEvaluator::new(100, true);
        let mut history = EventHistory::new();
        cross_lane(&history);
        let e = evaluator.evaluate(&mut history, 0.0, 0.0, 1);
        assert_eq!(e.reward, 0.0);
        assert!(!e.is_done());
        assert!(history.lane_invasions.is_empty());

        cross_lane(&history);
        cross_lane(&history);
        evaluator.evaluate(&mut history, 0.0, 0.0, 2);
        assert!(history.lane_invasions.is_empty());
    }

    #[test]
    fn test_step_limit_is_truncation() {
        let evaluator = RewardEvaluator::new(100, false);
        let mut history = EventHistory::new();

        assert!(!evaluator.evaluate(&mut history, 0.0, 0.0, 99).is_done());
        let e = evaluator.evaluate(&mut history, 0.0, 0.0, 100);
        assert!(e.is_truncated);
        assert!(!e.is_terminated);
        assert_eq!(e.cause, Some(TerminationCause::StepLimit));

        // A collision on the last step is reported as the cause.
        collide(&history);
        let e = evaluator.evaluate(&mut history, 0.0, 0.0, 100);
        assert!(e.is_terminated && e.is_truncated);
        assert_eq!(e.cause, Some(TerminationCause::Collision));
    }
}
