//! Environment.
use super::{Act, Info, Obs, Step};
use crate::{record::Record, ActionSpace, ObservationSpace};
use anyhow::Result;

/// Represents an environment, typically an MDP.
///
/// Both [`Env::reset`] and [`Env::step`] may fail. Failures are not episode
/// outcomes (those are reported through [`Step::is_terminated`] and
/// [`Step::is_truncated`]), they mean the environment itself could not make
/// progress and the caller has to decide what to do with it.
pub trait Env {
    /// Configurations.
    type Config: Clone;

    /// Observation of the environment.
    type Obs: Obs;

    /// Action of the environment.
    type Act: Act;

    /// Information in the [`Step`] object.
    type Info: Info;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// Performs an environment step.
    ///
    /// The returned [`Record`] carries information which is not part of the
    /// transition itself, like the speed of an agent or the cause of termination.
    fn step(&mut self, a: &Self::Act) -> Result<(Step<Self>, Record)>
    where
        Self: Sized;

    /// Starts a new episode and returns its first observation.
    fn reset(&mut self) -> Result<Self::Obs>;

    /// Resets the environment with a given index.
    ///
    /// The index is used in an arbitrary way. For example, it can be used as a random
    /// seed, which is useful when evaluating a trained agent on a fixed set of episodes.
    /// [`DefaultEvaluator`](crate::DefaultEvaluator) calls this method.
    fn reset_with_index(&mut self, ix: usize) -> Result<Self::Obs>;

    /// Returns the space the actions passed to [`Env::step`] live in.
    fn action_space(&self) -> ActionSpace;

    /// Returns the space of the observations this environment emits.
    fn observation_space(&self) -> ObservationSpace;
}
