//! Environment step.
use super::Env;
use std::fmt::{self, Debug};

/// Environment-specific data attached to a [`Step`], such as the cause of termination.
pub trait Info {}

impl Info for () {}

/// Outcome of [`Env::step`]: the action taken, the observation and reward that
/// followed, and whether the episode is over.
pub struct Step<E: Env> {
    pub act: E::Act,

    /// Observation after the action was applied.
    pub obs: E::Obs,

    /// Reward summed over the ticks the action was applied for.
    pub reward: f64,

    /// Flag denoting if the episode is terminated, i.e., it reached a terminal state.
    pub is_terminated: bool,

    /// Flag denoting if the episode is truncated, e.g., by a step limit.
    pub is_truncated: bool,

    pub info: E::Info,
}

impl<E: Env> Debug for Step<E>
where
    E::Obs: Debug,
    E::Act: Debug,
    E::Info: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("act", &self.act)
            .field("obs", &self.obs)
            .field("reward", &self.reward)
            .field("is_terminated", &self.is_terminated)
            .field("is_truncated", &self.is_truncated)
            .field("info", &self.info)
            .finish()
    }
}

impl<E: Env> Step<E> {
    /// Constructs a [`Step`] object.
    pub fn new(
        obs: E::Obs,
        act: E::Act,
        reward: f64,
        is_terminated: bool,
        is_truncated: bool,
        info: E::Info,
    ) -> Self {
        Step {
            act,
            obs,
            reward,
            is_terminated,
            is_truncated,
            info,
        }
    }

    /// Returns `true` if the episode is terminated or truncated.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.is_terminated || self.is_truncated
    }
}
