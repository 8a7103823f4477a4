//! Actions of [`CarlaEnv`](crate::CarlaEnv) and their conversion to vehicle control.
use crate::{error::CarlaEnvError, pure_pursuit::PurePursuitConfig, sim::VehicleControl};
use anyhow::Result;
use drivegym_core::{Act, ActionSpace};
use serde::{Deserialize, Serialize};

/// Values of the discrete action indices, shared by throttle/brake and steer.
pub const DISCRETE_LEVELS: [f64; 9] = [-1.0, -0.75, -0.5, -0.25, 0.0, 0.25, 0.5, 0.75, 1.0];

/// How agent actions are turned into [`VehicleControl`].
///
/// Bounds only describe the [`ActionSpace`] reported to agents, actions are not
/// clipped to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionMode {
    /// Throttle/brake and steer.
    Continuous {
        #[serde(default = "continuous_low")]
        low: Vec<f32>,
        #[serde(default = "continuous_high")]
        high: Vec<f32>,
    },

    /// Steer only, the throttle is constant.
    FixedThrottle {
        #[serde(default = "fixed_throttle")]
        throttle: f64,
        #[serde(default = "fixed_throttle_low")]
        low: Vec<f32>,
        #[serde(default = "fixed_throttle_high")]
        high: Vec<f32>,
    },

    /// Throttle/brake only, the steer is computed by a pure pursuit controller.
    PurePursuitThrottle {
        #[serde(default)]
        controller: PurePursuitConfig,
        #[serde(default = "pure_pursuit_low")]
        low: Vec<f32>,
        #[serde(default = "pure_pursuit_high")]
        high: Vec<f32>,
    },

    /// Indices into [`DISCRETE_LEVELS`] for throttle/brake and steer.
    Discrete,
}

fn continuous_low() -> Vec<f32> {
    vec![-1.0, -1.0]
}

fn continuous_high() -> Vec<f32> {
    vec![1.0, 1.0]
}

fn fixed_throttle() -> f64 {
    0.3
}

fn fixed_throttle_low() -> Vec<f32> {
    vec![-0.6]
}

fn fixed_throttle_high() -> Vec<f32> {
    vec![0.6]
}

fn pure_pursuit_low() -> Vec<f32> {
    vec![-0.7]
}

fn pure_pursuit_high() -> Vec<f32> {
    vec![0.5]
}

impl Default for ActionMode {
    fn default() -> Self {
        Self::continuous()
    }
}

impl ActionMode {
    /// Continuous mode with bounds `[-1, 1]` on both components.
    pub fn continuous() -> Self {
        Self::Continuous {
            low: continuous_low(),
            high: continuous_high(),
        }
    }

    /// Fixed throttle mode with throttle 0.3 and steer bounds `[-0.6, 0.6]`.
    pub fn fixed_throttle() -> Self {
        Self::FixedThrottle {
            throttle: fixed_throttle(),
            low: fixed_throttle_low(),
            high: fixed_throttle_high(),
        }
    }

    /// Pure pursuit mode with throttle/brake bounds `[-0.7, 0.5]`.
    pub fn pure_pursuit_throttle() -> Self {
        Self::PurePursuitThrottle {
            controller: PurePursuitConfig::default(),
            low: pure_pursuit_low(),
            high: pure_pursuit_high(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Continuous { .. } => "continuous",
            Self::FixedThrottle { .. } => "fixed_throttle",
            Self::PurePursuitThrottle { .. } => "pure_pursuit_throttle",
            Self::Discrete => "discrete",
        }
    }

    pub fn is_pure_pursuit(&self) -> bool {
        matches!(self, Self::PurePursuitThrottle { .. })
    }

    pub fn action_space(&self) -> ActionSpace {
        match self {
            Self::Continuous { low, high }
            | Self::FixedThrottle { low, high, .. }
            | Self::PurePursuitThrottle { low, high, .. } => ActionSpace::Box {
                low: low.clone(),
                high: high.clone(),
            },
            Self::Discrete => {
                ActionSpace::MultiDiscrete(vec![DISCRETE_LEVELS.len(), DISCRETE_LEVELS.len()])
            }
        }
    }

    /// Converts an action into vehicle control.
    ///
    /// `pursuit_steer` is called only in pure pursuit mode.
    pub fn decode<F>(&self, act: &CarlaAct, pursuit_steer: F) -> Result<VehicleControl>
    where
        F: FnOnce() -> Result<f64>,
    {
        let control = match (self, act) {
            (
                Self::Continuous { .. },
                CarlaAct::Continuous {
                    throttle_brake,
                    steer,
                },
            ) => split(*throttle_brake as f64, *steer as f64),
            (Self::FixedThrottle { throttle, .. }, CarlaAct::FixedThrottle { steer }) => {
                VehicleControl::new(*throttle, *steer as f64, 0.0)
            }
            (Self::PurePursuitThrottle { .. }, CarlaAct::PurePursuit { throttle_brake }) => {
                split(*throttle_brake as f64, pursuit_steer()?)
            }
            (
                Self::Discrete,
                CarlaAct::Discrete {
                    throttle_ix,
                    steer_ix,
                },
            ) => split(level(*throttle_ix)?, level(*steer_ix)?),
            _ => {
                return Err(CarlaEnvError::ActionMismatch {
                    expected: self.name(),
                    got: act.name(),
                }
                .into())
            }
        };
        Ok(control)
    }
}

/// Positive values accelerate, others brake with their magnitude.
fn split(throttle_brake: f64, steer: f64) -> VehicleControl {
    if throttle_brake > 0.0 {
        VehicleControl::new(throttle_brake, steer, 0.0)
    } else {
        VehicleControl::new(0.0, steer, -throttle_brake)
    }
}

fn level(ix: usize) -> Result<f64> {
    DISCRETE_LEVELS
        .get(ix)
        .copied()
        .ok_or_else(|| CarlaEnvError::DiscreteIndexOutOfRange(ix).into())
}

/// Action of [`CarlaEnv`](crate::CarlaEnv), one variant per [`ActionMode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CarlaAct {
    Continuous { throttle_brake: f32, steer: f32 },
    FixedThrottle { steer: f32 },
    PurePursuit { throttle_brake: f32 },
    Discrete { throttle_ix: usize, steer_ix: usize },
}

impl CarlaAct {
    /// Name of the [`ActionMode`] this action belongs to.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Continuous { .. } => "continuous",
            Self::FixedThrottle { .. } => "fixed_throttle",
            Self::PurePursuit { .. } => "pure_pursuit_throttle",
            Self::Discrete { .. } => "discrete",
        }
    }
}

impl Act for CarlaAct {
    fn len(&self) -> usize {
        match self {
            Self::Continuous { .. } | Self::Discrete { .. } => 2,
            Self::FixedThrottle { .. } | Self::PurePursuit { .. } => 1,
        }
    }
}
