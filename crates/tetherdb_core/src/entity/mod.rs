//! Entity types.
//!
//! An entity is a plain Rust value. Held directly it is *unmanaged*: it has
//! no key and nothing in the database knows about it. Once added through a
//! write transaction it is *managed*: the database assigns an [`EntityKey`]
//! and hands back a [`crate::Managed`] handle confined to the context that
//! produced it.

mod id;
mod key;
mod link;

pub use id::EntityId;
pub use key::EntityKey;
pub use link::Link;

use crate::error::CoreResult;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A type that can be stored in TetherDB.
///
/// `KIND` names the collection the type lives in and qualifies every key of
/// that type. It must be stable across releases since it is written to the
/// commit log.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use tetherdb_core::Entity;
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Beatmap {
///     title: String,
///     hidden: bool,
/// }
///
/// impl Entity for Beatmap {
///     const KIND: &'static str = "beatmap";
/// }
/// ```
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable name of the entity type.
    const KIND: &'static str;
}

pub(crate) fn encode<T: Entity>(entity: &T) -> CoreResult<Vec<u8>> {
    Ok(tetherdb_codec::to_cbor(entity)?)
}

pub(crate) fn decode<T: Entity>(bytes: &[u8]) -> CoreResult<T> {
    Ok(tetherdb_codec::from_cbor(bytes)?)
}
