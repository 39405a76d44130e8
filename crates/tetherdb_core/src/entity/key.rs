//! Type-qualified identity keys.

use crate::entity::{Entity, EntityId};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// The identity of a stored row: its entity kind plus its [`EntityId`].
///
/// Keys carry no thread-bound resource. They are what a [`crate::LiveRef`]
/// keeps to re-resolve an entity on another thread, and they serialize so
/// they can be persisted or sent elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    kind: Cow<'static, str>,
    id: EntityId,
}

impl EntityKey {
    /// Creates a key from a kind name and an ID.
    #[must_use]
    pub fn new(kind: impl Into<Cow<'static, str>>, id: EntityId) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }

    /// Creates a key for an entity of type `T`.
    #[must_use]
    pub fn of<T: Entity>(id: EntityId) -> Self {
        Self::new(T::KIND, id)
    }

    /// Returns the entity kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the entity ID.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Returns true if the key belongs to entities of type `T`.
    #[must_use]
    pub fn is_kind<T: Entity>(&self) -> bool {
        self.kind == T::KIND
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_same_id_and_kind_are_equal() {
        let id = EntityId::new();
        let owned = EntityKey::new(String::from("beatmap"), id);
        let borrowed = EntityKey::new("beatmap", id);
        assert_eq!(owned, borrowed);
        assert_ne!(borrowed, EntityKey::new("ruleset", id));
    }

    #[test]
    fn display_joins_kind_and_id() {
        let key = EntityKey::new("ruleset", EntityId::from_bytes([0xff; 16]));
        assert_eq!(
            key.to_string(),
            "ruleset/ffffffff-ffff-ffff-ffff-ffffffffffff"
        );
    }

    #[test]
    fn keys_survive_cbor() {
        let key = EntityKey::new("beatmap", EntityId::new());
        let bytes = tetherdb_codec::to_cbor(&key).unwrap();
        let decoded: EntityKey = tetherdb_codec::from_cbor(&bytes).unwrap();
        assert_eq!(decoded, key);
    }
}
