//! Core functionalities.
mod env;
mod policy;
mod step;
pub use env::Env;
pub use policy::{Configurable, Policy};
use std::fmt::Debug;
pub use step::{Info, Step};

/// An observation of an environment.
///
/// Environments in this library are not vectorized, so an observation object
/// holds exactly one observation and [`Obs::len()`] returns 1 unless an
/// implementation batches several of them.
pub trait Obs: Clone + Debug {
    /// Returns the number of observations in the object.
    fn len(&self) -> usize;
}

/// An action applied to an environment.
pub trait Act: Clone + Debug {
    /// Returns the number of actions in the object.
    fn len(&self) -> usize;
}
