//! Live collection views.

use super::ContextInner;
use crate::entity::{Entity, EntityKey};
use crate::error::{CoreError, CoreResult};
use crate::managed::Managed;
use crate::notify::{ChangeSet, SubscriptionToken};
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

/// Every entity of type `T` as the owning context sees it.
///
/// A query holds no rows. Each call evaluates against the context's
/// current snapshot, so the same query reports new rows once the context
/// has refreshed.
pub struct Query<T> {
    context: Weak<ContextInner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Query<T> {
    pub(crate) fn new(context: &Rc<ContextInner>) -> Self {
        Self {
            context: Rc::downgrade(context),
            _marker: PhantomData,
        }
    }

    fn context(&self) -> CoreResult<Rc<ContextInner>> {
        let context = self.context.upgrade().ok_or(CoreError::ContextClosed)?;
        context.enter()?;
        Ok(context)
    }

    /// Returns the number of rows.
    pub fn count(&self) -> CoreResult<usize> {
        Ok(self.context()?.count_of(T::KIND))
    }

    /// Returns true if there are no rows.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.count()? == 0)
    }

    /// Returns the keys of all rows, oldest insert first.
    pub fn keys(&self) -> CoreResult<Vec<EntityKey>> {
        Ok(self.context()?.keys_of(T::KIND))
    }

    /// Resolves the oldest row.
    pub fn first(&self) -> CoreResult<Option<Managed<T>>> {
        let context = self.context()?;
        match context.keys_of(T::KIND).first() {
            Some(key) => context.resolve(key).map(Some),
            None => Ok(None),
        }
    }

    /// Resolves every row.
    pub fn to_vec(&self) -> CoreResult<Vec<Managed<T>>> {
        let context = self.context()?;
        context
            .keys_of(T::KIND)
            .iter()
            .map(|key| context.resolve(key))
            .collect()
    }

    /// Decodes every row.
    pub fn values(&self) -> CoreResult<Vec<T>> {
        let context = self.context()?;
        context
            .keys_of(T::KIND)
            .iter()
            .map(|key| context.read(key))
            .collect()
    }

    /// Calls `callback` each time a refresh changes rows of type `T`.
    ///
    /// The callback receives this query, the keys that changed and, once
    /// when the factory shuts the context down, `ContextClosed`. It runs on
    /// the context's thread and never for a refresh that changed nothing.
    pub fn subscribe<F>(&self, mut callback: F) -> CoreResult<SubscriptionToken>
    where
        F: FnMut(&Query<T>, &ChangeSet, Option<&CoreError>) + 'static,
    {
        let context = self.context()?;
        let query = self.clone();
        let token = context.hub.borrow_mut().subscribe(
            context.id(),
            T::KIND,
            context.generation(),
            Box::new(move |changes, error| callback(&query, changes, error)),
        );
        Ok(token)
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            context: Weak::clone(&self.context),
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("kind", &T::KIND)
            .field("context_alive", &(self.context.strong_count() > 0))
            .finish()
    }
}
