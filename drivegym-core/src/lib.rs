#![warn(missing_docs)]
//! Environment contract for driving reinforcement learning.
//!
//! An environment implements [`Env`]: it is built from a configuration and a seed,
//! [`reset`](Env::reset) yields the first observation of an episode and
//! [`step`](Env::step) applies an action and returns a [`Step`] together with a
//! [`Record`](record::Record) holding additional information.
//!
//! Agents interact with environments through [`Policy`], and [`DefaultEvaluator`]
//! runs a fixed number of episodes with a policy, reporting the mean return.
pub mod error;
pub mod record;

mod base;
pub use base::{Act, Configurable, Env, Info, Obs, Policy, Step};

mod space;
pub use space::{ActionSpace, ObservationSpace};

mod evaluator;
pub use evaluator::{DefaultEvaluator, Evaluator};
