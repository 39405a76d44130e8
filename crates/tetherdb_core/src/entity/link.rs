//! Key-only relations between entities.

use crate::entity::{Entity, EntityId, EntityKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A stored reference from one entity to another.
///
/// Relations are persisted as the target's ID only and resolved on demand
/// through a context with [`crate::Context::resolve_link`]. Records that
/// reference each other therefore never form ownership cycles in memory.
///
/// ```rust,ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Beatmap {
///     ruleset: Link<Ruleset>,
///     hidden: bool,
/// }
///
/// let ruleset = context.resolve_link(&beatmap.ruleset)?;
/// ```
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Link<T> {
    id: EntityId,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Link<T> {
    /// Creates a link to the entity with `id`.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Returns the target's ID.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Returns the target's key.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::of::<T>(self.id)
    }
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Link<T> {}

impl<T> PartialEq for Link<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Link<T> {}

impl<T> Hash for Link<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: Entity> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({})", self.key())
    }
}
