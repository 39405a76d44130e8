//! Thread-agnostic entity references.

use crate::context::FactoryShared;
use crate::entity::{Entity, EntityKey};
use crate::error::{CoreError, CoreResult};
use crate::managed::Managed;
use parking_lot::RwLock;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A reference to an entity that can be stored and sent across threads.
///
/// A live reference to a managed entity keeps only its [`EntityKey`] and
/// the factory it came from. Every scoped access re-resolves the key
/// through a context on the calling thread, so it never touches a context
/// belonging to another thread and never reads a row the caller's thread
/// could not see.
///
/// A live reference to an unmanaged value wraps the value itself and never
/// involves the database. A reference stays managed or unmanaged for its
/// whole life.
///
/// # Equality
///
/// Managed references are equal when their keys are, whichever context
/// produced them. Unmanaged references are equal only when they wrap the
/// same allocation; two unmanaged references to equal-looking values are
/// different references.
pub struct LiveRef<T> {
    inner: Inner<T>,
}

enum Inner<T> {
    Unmanaged(Arc<T>),
    Managed {
        key: EntityKey,
        factory: Arc<FactoryShared>,
        /// Best-effort copy from the last scoped access; never
        /// authoritative.
        last_known: RwLock<Option<Arc<T>>>,
    },
}

impl<T: Entity> LiveRef<T> {
    /// Wraps an unmanaged value.
    #[must_use]
    pub fn unmanaged(value: T) -> Self {
        Self::from(Arc::new(value))
    }

    fn managed(key: EntityKey, factory: Arc<FactoryShared>, last_known: Option<T>) -> Self {
        Self {
            inner: Inner::Managed {
                key,
                factory,
                last_known: RwLock::new(last_known.map(Arc::new)),
            },
        }
    }

    /// Returns the entity's key, or `None` for an unmanaged value.
    #[must_use]
    pub fn key(&self) -> Option<&EntityKey> {
        match &self.inner {
            Inner::Unmanaged(_) => None,
            Inner::Managed { key, .. } => Some(key),
        }
    }

    /// Returns true if the reference points at a stored row.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        matches!(self.inner, Inner::Managed { .. })
    }

    /// Returns the value seen by the last scoped access, or the wrapped
    /// value of an unmanaged reference.
    ///
    /// The copy may be stale; use [`LiveRef::perform_read`] for the current
    /// row.
    #[must_use]
    pub fn last_known(&self) -> Option<Arc<T>> {
        match &self.inner {
            Inner::Unmanaged(value) => Some(Arc::clone(value)),
            Inner::Managed { last_known, .. } => last_known.read().clone(),
        }
    }

    /// Returns the entity without opening a scope.
    ///
    /// For an unmanaged value this always succeeds. For a managed entity it
    /// only succeeds on a thread holding an open context in which the key is
    /// already resolved; the row is read at that context's snapshot without
    /// refreshing.
    ///
    /// # Errors
    ///
    /// - `InvalidScopeAccess` if no open context on this thread resolved it
    /// - `EntityInvalid` if it is resolved but the row was removed
    pub fn value(&self) -> CoreResult<T> {
        match &self.inner {
            Inner::Unmanaged(value) => Ok(T::clone(value)),
            Inner::Managed { key, factory, .. } => factory.read_resolved(key),
        }
    }

    /// Runs `action` on the current value.
    ///
    /// For a managed entity this uses the calling thread's context (a
    /// transient one if there is none), first refreshing every open context
    /// of the factory on this thread. Notifications made due by that
    /// refresh fire before `action` runs.
    ///
    /// # Errors
    ///
    /// Returns `EntityInvalid` if the row no longer exists, or
    /// `FactoryShutdown` if no context can be opened.
    pub fn perform_read<R>(&self, action: impl FnOnce(&T) -> R) -> CoreResult<R> {
        match &self.inner {
            Inner::Unmanaged(value) => Ok(action(value)),
            Inner::Managed {
                key,
                factory,
                last_known,
            } => factory.run(|context| {
                factory.refresh_thread()?;
                let value = context.resolve::<T>(key)?.get()?;
                let result = action(&value);
                *last_known.write() = Some(Arc::new(value));
                Ok(result)
            }),
        }
    }

    /// Runs `action` on the current value inside a write transaction and
    /// commits the result before returning.
    ///
    /// # Errors
    ///
    /// Returns `UnmanagedWriteAttempt` for an unmanaged value, which is left
    /// untouched. Otherwise as [`LiveRef::perform_read`], plus commit errors.
    pub fn perform_write<R>(&self, action: impl FnOnce(&mut T) -> R) -> CoreResult<R> {
        match &self.inner {
            Inner::Unmanaged(_) => Err(CoreError::UnmanagedWriteAttempt),
            Inner::Managed {
                key,
                factory,
                last_known,
            } => factory.run(|context| {
                factory.refresh_thread()?;
                let (result, value) = context.write(|scope| {
                    let result = scope.modify_key(key, action)?;
                    let value = scope.resolve::<T>(key)?.get()?;
                    Ok((result, value))
                })?;
                *last_known.write() = Some(Arc::new(value));
                Ok(result)
            }),
        }
    }
}

impl<T: Entity> From<Arc<T>> for LiveRef<T> {
    fn from(value: Arc<T>) -> Self {
        Self {
            inner: Inner::Unmanaged(value),
        }
    }
}

impl<T> Clone for LiveRef<T> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            Inner::Unmanaged(value) => Inner::Unmanaged(Arc::clone(value)),
            Inner::Managed {
                key,
                factory,
                last_known,
            } => Inner::Managed {
                key: key.clone(),
                factory: Arc::clone(factory),
                last_known: RwLock::new(last_known.read().clone()),
            },
        };
        Self { inner }
    }
}

impl<T> PartialEq for LiveRef<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Inner::Unmanaged(a), Inner::Unmanaged(b)) => Arc::ptr_eq(a, b),
            (Inner::Managed { key: a, .. }, Inner::Managed { key: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl<T> Eq for LiveRef<T> {}

impl<T> Hash for LiveRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.inner {
            Inner::Unmanaged(value) => {
                state.write_u8(0);
                Arc::as_ptr(value).hash(state);
            }
            Inner::Managed { key, .. } => {
                state.write_u8(1);
                key.hash(state);
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for LiveRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Unmanaged(value) => f.debug_tuple("LiveRef::Unmanaged").field(value).finish(),
            Inner::Managed { key, .. } => f.debug_tuple("LiveRef::Managed").field(key).finish(),
        }
    }
}

/// Conversion into a [`LiveRef`].
///
/// Implemented for every entity value (wrapped as unmanaged) and for
/// [`Managed`] handles (wrapped by key).
pub trait IntoLive {
    /// The referenced entity type.
    type Entity: Entity;

    /// Creates a live reference.
    fn to_live(&self) -> LiveRef<Self::Entity>;
}

impl<T: Entity> IntoLive for T {
    type Entity = T;

    fn to_live(&self) -> LiveRef<T> {
        LiveRef::unmanaged(self.clone())
    }
}

impl<T: Entity> IntoLive for Managed<T> {
    type Entity = T;

    fn to_live(&self) -> LiveRef<T> {
        LiveRef::managed(
            self.key().clone(),
            Arc::clone(self.factory()),
            self.get().ok(),
        )
    }
}
