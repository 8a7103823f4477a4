//! Descriptors of action and observation spaces.
//!
//! The types mirror the box and multi-discrete spaces of Gymnasium. They describe
//! what an environment accepts and emits; environments do not validate actions
//! against them.
use serde::{Deserialize, Serialize};

/// The space actions of an environment live in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSpace {
    /// A box in `R^n`, with element-wise bounds.
    Box {
        /// Lower bounds.
        low: Vec<f32>,

        /// Upper bounds.
        high: Vec<f32>,
    },

    /// A vector of categorical values, the `i`-th one taking values in `0..nvec[i]`.
    MultiDiscrete(Vec<usize>),
}

impl ActionSpace {
    /// Returns the number of elements of an action.
    pub fn dim(&self) -> usize {
        match self {
            Self::Box { low, .. } => low.len(),
            Self::MultiDiscrete(nvec) => nvec.len(),
        }
    }

    /// Returns `true` if `act` lies inside a [`ActionSpace::Box`].
    ///
    /// Always `false` for [`ActionSpace::MultiDiscrete`].
    pub fn contains_continuous(&self, act: &[f32]) -> bool {
        match self {
            Self::Box { low, high } => {
                act.len() == low.len()
                    && act
                        .iter()
                        .zip(low.iter().zip(high.iter()))
                        .all(|(a, (l, h))| l <= a && a <= h)
            }
            Self::MultiDiscrete(_) => false,
        }
    }

    /// Returns `true` if `act` is a valid vector of indices of a [`ActionSpace::MultiDiscrete`].
    ///
    /// Always `false` for [`ActionSpace::Box`].
    pub fn contains_discrete(&self, act: &[usize]) -> bool {
        match self {
            Self::MultiDiscrete(nvec) => {
                act.len() == nvec.len() && act.iter().zip(nvec.iter()).all(|(a, n)| a < n)
            }
            Self::Box { .. } => false,
        }
    }
}

/// The space observations of an environment live in.
///
/// Observations are fixed-shape boxes of bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSpace {
    /// Shape of an observation.
    pub shape: Vec<usize>,

    /// Lower bound of every element.
    pub low: u8,

    /// Upper bound of every element.
    pub high: u8,
}

impl ObservationSpace {
    /// A box of images of the given size, `(height, width, channels)`, with values in `[0, 255]`.
    pub fn image(height: usize, width: usize, channels: usize) -> Self {
        Self {
            shape: vec![height, width, channels],
            low: u8::MIN,
            high: u8::MAX,
        }
    }

    /// The number of elements of an observation.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}
