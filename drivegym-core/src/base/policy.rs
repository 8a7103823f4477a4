//! Policy.
use super::Env;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::{fs::File, io::BufReader, path::Path};

/// A policy on an environment.
///
/// Policy is a mapping from an observation to an action.
/// The mapping can be either of deterministic or stochastic.
pub trait Policy<E: Env> {
    /// Sample an action given an observation.
    fn sample(&mut self, obs: &E::Obs) -> E::Act;

    /// Called at the beginning of every episode.
    ///
    /// Stateful policies (e.g., ones holding recurrent state) clear it here.
    /// Does nothing in the default implementation.
    fn reset(&mut self) {}
}

impl<E: Env, P: Policy<E> + ?Sized> Policy<E> for Box<P> {
    fn sample(&mut self, obs: &E::Obs) -> E::Act {
        (**self).sample(obs)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// An object built from a deserializable configuration.
pub trait Configurable<E: Env> {
    /// Configuration.
    type Config: Clone + DeserializeOwned;

    /// Builds the object.
    fn build(config: Self::Config) -> Self;

    /// Builds the object with the configuration in the yaml file of the given path.
    fn build_from_path(path: impl AsRef<Path>) -> Result<Self>
    where
        Self: Sized,
    {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let config = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Self::build(config))
    }
}
