//! Ownership of the actors spawned for an episode.
use crate::sim::{ActorId, Simulator};
use log::{trace, warn};

/// Role of an actor in an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorKind {
    Ego,
    Camera,
    PreviewCamera,
    CollisionSensor,
    LaneInvasionSensor,
    Traffic,
}

/// Actors owned by the running episode, in spawn order.
#[derive(Debug, Default)]
pub struct ActorSet {
    actors: Vec<(ActorId, ActorKind)>,
}

impl ActorSet {
    /// Registers an actor. An id already owned is not added again.
    pub fn insert(&mut self, kind: ActorKind, id: ActorId) {
        if self.contains(id) {
            warn!("Actor {} is already owned", id);
            return;
        }
        self.actors.push((id, kind));
    }

    pub fn contains(&self, id: ActorId) -> bool {
        self.actors.iter().any(|(i, _)| *i == id)
    }

    /// Ids of the actors of a kind.
    pub fn ids(&self, kind: ActorKind) -> impl Iterator<Item = ActorId> + '_ {
        self.actors
            .iter()
            .filter(move |(_, k)| *k == kind)
            .map(|(id, _)| *id)
    }

    pub fn count(&self, kind: ActorKind) -> usize {
        self.ids(kind).count()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ActorId, ActorKind)> {
        self.actors.iter()
    }

    /// Stops and destroys all actors, then forgets them.
    ///
    /// Actors are released in reverse spawn order, so sensors go before the vehicle
    /// they are attached to. Failures are logged and the remaining actors are still
    /// released. Calling this on an empty set does nothing.
    pub fn teardown<S: Simulator>(&mut self, sim: &mut S) {
        for (id, kind) in self.actors.iter().rev() {
            if sim.is_listening(*id) {
                if let Err(e) = sim.stop(*id) {
                    warn!("Failed to stop {:?} {}: {}", kind, id, e);
                }
            }
            if sim.is_alive(*id) {
                match sim.destroy_actor(*id) {
                    Ok(()) => trace!("Destroyed {:?} {}", kind, id),
                    Err(e) => warn!("Failed to destroy {:?} {}: {}", kind, id, e),
                }
            }
        }
        self.actors.clear();
    }
}

/// Tears the episode down when dropped, unless disarmed.
///
/// Held while an episode is being set up or advanced. If that returns early with an
/// error, or panics, the actors spawned so far are released when the guard goes out
/// of scope.
pub struct EpisodeGuard<'a, S: Simulator> {
    sim: &'a mut S,
    actors: &'a mut ActorSet,
    armed: bool,
}

impl<'a, S: Simulator> EpisodeGuard<'a, S> {
    pub fn new(sim: &'a mut S, actors: &'a mut ActorSet) -> Self {
        Self {
            sim,
            actors,
            armed: true,
        }
    }

    pub fn sim(&mut self) -> &mut S {
        &mut *self.sim
    }

    pub fn actors(&self) -> &ActorSet {
        self.actors
    }

    /// Takes ownership of an actor.
    pub fn register(&mut self, kind: ActorKind, id: ActorId) {
        self.actors.insert(kind, id);
    }

    /// Keeps the actors alive when the guard is dropped.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl<'a, S: Simulator> Drop for EpisodeGuard<'a, S> {
    fn drop(&mut self) {
        if self.armed {
            self.actors.teardown(&mut *self.sim);
        }
    }
}
