//! Context-bound entity handles.

use crate::context::{ContextInner, FactoryShared};
use crate::entity::{Entity, EntityId, EntityKey, Link};
use crate::error::{CoreError, CoreResult};
use crate::types::ContextId;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// An entity resolved in a [`crate::Context`].
///
/// A managed handle is a live view, not a copy: [`Managed::get`] decodes the
/// row as the owning context currently sees it, so the value changes when
/// the context refreshes. The handle is confined to the context's thread
/// and stops working when the context closes. To hand an entity to another
/// thread, convert it with [`crate::IntoLive::to_live`].
pub struct Managed<T> {
    key: EntityKey,
    context: Weak<ContextInner>,
    factory: Arc<FactoryShared>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Managed<T> {
    pub(crate) fn new(key: EntityKey, context: Weak<ContextInner>, factory: Arc<FactoryShared>) -> Self {
        Self {
            key,
            context,
            factory,
            _marker: PhantomData,
        }
    }

    /// Returns the entity's key.
    #[must_use]
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Returns the entity's ID.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.key.id()
    }

    /// Returns false once the owning context closed or no longer sees the
    /// row.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.context
            .upgrade()
            .is_some_and(|context| context.is_open() && context.read_row(&self.key).is_some())
    }

    /// Decodes the row at the owning context's current snapshot.
    ///
    /// # Errors
    ///
    /// - `ContextClosed` if the owning context was closed
    /// - `EntityInvalid` if the row was removed
    pub fn get(&self) -> CoreResult<T> {
        let context = self.live_context()?;
        context.enter()?;
        context.read(&self.key)
    }

    /// Returns a key-only relation to this entity, for storing in another
    /// entity.
    #[must_use]
    pub fn link(&self) -> Link<T> {
        Link::new(self.key.id())
    }

    /// Returns the ID of the owning context, if it still exists.
    #[must_use]
    pub fn context_id(&self) -> Option<ContextId> {
        self.context.upgrade().map(|context| context.id())
    }

    pub(crate) fn factory(&self) -> &Arc<FactoryShared> {
        &self.factory
    }

    fn live_context(&self) -> CoreResult<Rc<ContextInner>> {
        self.context.upgrade().ok_or(CoreError::ContextClosed)
    }
}

impl<T> Clone for Managed<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            context: Weak::clone(&self.context),
            factory: Arc::clone(&self.factory),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Managed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Managed<T> {}

impl<T> fmt::Debug for Managed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Managed")
            .field("key", &self.key)
            .field("context_alive", &(self.context.strong_count() > 0))
            .finish()
    }
}
