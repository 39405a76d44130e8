//! Thread-confined contexts.
//!
//! A [`Context`] is a transactional view of the database pinned to the
//! thread that created it. It reads at a snapshot, the sequence number of
//! the newest commit it has seen, and moves that snapshot forward only when
//! it refreshes: explicitly, at the start of a write, or implicitly through
//! scoped access on a [`crate::LiveRef`].
//!
//! Each forward move bumps the context's generation and notifies its
//! subscribers with what changed. Contexts are `!Send`; the compiler keeps
//! them, and the [`Managed`] handles they produce, on their own thread.

mod factory;
mod query;
mod registry;
mod write;

pub use factory::ContextFactory;
pub use query::Query;
pub use write::WriteScope;

pub(crate) use factory::FactoryShared;

use crate::entity::{self, Entity, EntityId, EntityKey, Link};
use crate::error::{CoreError, CoreResult};
use crate::managed::Managed;
use crate::notify::{Callback, ChangeSet, NotificationHub, SubscriptionToken};
use crate::types::{ContextId, SequenceNumber};
use factory::ContextControl;
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::ThreadId;
use write::PendingWrite;

/// Changes made visible by one snapshot advance.
struct Advance {
    generation: u64,
    changes: Vec<(&'static str, ChangeSet)>,
}

/// Resets a flag when dropped.
struct ResetOnDrop<'a>(&'a Cell<bool>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// State of one context, owned by its thread.
pub(crate) struct ContextInner {
    id: ContextId,
    factory: Arc<FactoryShared>,
    control: Arc<ContextControl>,
    closed: Cell<bool>,
    snapshot: Cell<SequenceNumber>,
    generation: Cell<u64>,
    pending: RefCell<Option<PendingWrite>>,
    resolved: RefCell<HashSet<EntityKey>>,
    hub: RefCell<NotificationHub>,
    delivering: Cell<bool>,
    queue: RefCell<VecDeque<Advance>>,
}

impl ContextInner {
    fn new(id: ContextId, factory: Arc<FactoryShared>, control: Arc<ContextControl>) -> Self {
        let snapshot = control.snapshot();
        Self {
            id,
            factory,
            control,
            closed: Cell::new(false),
            snapshot: Cell::new(snapshot),
            generation: Cell::new(0),
            pending: RefCell::new(None),
            resolved: RefCell::new(HashSet::new()),
            hub: RefCell::new(NotificationHub::new()),
            delivering: Cell::new(false),
            queue: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn factory(&self) -> &Arc<FactoryShared> {
        &self.factory
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.closed.get() && !self.control.is_closed()
    }

    pub(crate) fn in_write(&self) -> bool {
        self.pending.borrow().is_some()
    }

    /// Fails if the context is closed. A context closed by factory shutdown
    /// is released here, on its own thread, and its subscribers are told.
    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.get() {
            return Err(CoreError::ContextClosed);
        }
        if self.control.is_closed() {
            notify_closed(self.release());
            return Err(CoreError::ContextClosed);
        }
        Ok(())
    }

    /// Entry point of every operation: checks the context is open and
    /// honours a refresh requested through the factory.
    pub(crate) fn enter(&self) -> CoreResult<()> {
        self.ensure_open()?;
        if !self.in_write() && self.control.take_refresh_request() {
            self.advance_to(self.factory.store.committed_seq());
        }
        Ok(())
    }

    /// Moves to the newest commit. Returns true if anything new became
    /// visible.
    pub(crate) fn refresh(&self) -> CoreResult<bool> {
        self.ensure_open()?;
        if self.in_write() {
            return Err(CoreError::invalid_operation(
                "cannot refresh inside a write transaction",
            ));
        }
        self.control.take_refresh_request();
        Ok(self.advance_to(self.factory.store.committed_seq()))
    }

    pub(crate) fn advance_to(&self, target: SequenceNumber) -> bool {
        let from = self.snapshot.get();
        if target <= from {
            return false;
        }

        // Changes are computed before the new snapshot is published so a
        // concurrent vacuum keeps the history between the two.
        let kinds = self.hub.borrow().kinds();
        let changes = self.factory.store.changes_between(&kinds, from, target);

        self.snapshot.set(target);
        self.control.publish_snapshot(target);
        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        tracing::debug!(
            context = %self.id,
            generation,
            sequence = %target,
            "context refreshed"
        );

        self.publish(Advance {
            generation,
            changes,
        });
        true
    }

    /// Queues an advance for delivery and delivers the queue unless a
    /// delivery further up the stack already does.
    fn publish(&self, advance: Advance) {
        if advance.changes.iter().all(|(_, changes)| changes.is_empty()) {
            return;
        }
        self.queue.borrow_mut().push_back(advance);
        if self.delivering.replace(true) {
            return;
        }
        let _reset = ResetOnDrop(&self.delivering);

        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(advance) = next else { break };
            self.deliver(&advance);
        }
    }

    fn deliver(&self, advance: &Advance) {
        let due = self.hub.borrow().due(advance.generation);
        for (id, kind) in due {
            if self.closed.get() {
                return;
            }
            let changes = match advance.changes.iter().find(|(k, _)| *k == kind) {
                Some((_, changes)) if !changes.is_empty() => changes,
                _ => continue,
            };
            let callback = self.hub.borrow_mut().take_callback(id);
            if let Some(mut callback) = callback {
                callback(changes, None);
                self.hub.borrow_mut().restore_callback(id, callback);
            }
        }
    }

    /// Returns the row visible to this context, honouring a running write
    /// transaction's own writes.
    pub(crate) fn read_row(&self, key: &EntityKey) -> Option<Arc<[u8]>> {
        let pending = self.pending.borrow();
        match pending.as_ref() {
            Some(pending) => match pending.lookup(key) {
                Some(row) => row,
                None => self.factory.store.get_at(key, pending.read_seq()),
            },
            None => self.factory.store.get_at(key, self.snapshot.get()),
        }
    }

    pub(crate) fn read<T: Entity>(&self, key: &EntityKey) -> CoreResult<T> {
        check_kind::<T>(key)?;
        let row = self
            .read_row(key)
            .ok_or_else(|| CoreError::entity_invalid(key.clone()))?;
        entity::decode(&row)
    }

    pub(crate) fn keys_of(&self, kind: &str) -> Vec<EntityKey> {
        let pending = self.pending.borrow();
        match pending.as_ref() {
            Some(pending) => {
                pending.merge_keys(kind, self.factory.store.keys_at(kind, pending.read_seq()))
            }
            None => self.factory.store.keys_at(kind, self.snapshot.get()),
        }
    }

    pub(crate) fn count_of(&self, kind: &str) -> usize {
        if self.in_write() {
            return self.keys_of(kind).len();
        }
        self.factory.store.count_at(kind, self.snapshot.get())
    }

    /// Materialises `key` and marks it resolved in this context.
    pub(crate) fn resolve<T: Entity>(self: &Rc<Self>, key: &EntityKey) -> CoreResult<Managed<T>> {
        check_kind::<T>(key)?;
        if self.read_row(key).is_none() {
            return Err(CoreError::entity_invalid(key.clone()));
        }
        self.mark_resolved(key);
        Ok(Managed::new(
            key.clone(),
            Rc::downgrade(self),
            Arc::clone(&self.factory),
        ))
    }

    pub(crate) fn mark_resolved(&self, key: &EntityKey) {
        self.resolved.borrow_mut().insert(key.clone());
    }

    pub(crate) fn is_resolved(&self, key: &EntityKey) -> bool {
        self.resolved.borrow().contains(key)
    }

    /// Closes the context and returns the subscribers it had. Only the
    /// first call does anything.
    fn release(&self) -> Vec<Callback> {
        if self.closed.replace(true) {
            return Vec::new();
        }
        self.control.mark_closed();
        self.factory.deregister(&self.control);
        registry::deregister(self);

        self.resolved.borrow_mut().clear();
        self.queue.borrow_mut().clear();
        let callbacks = self.hub.borrow_mut().drain();

        tracing::debug!(
            context = %self.id,
            generation = self.generation.get(),
            "context closed"
        );
        self.factory.vacuum();
        callbacks
    }
}

fn check_kind<T: Entity>(key: &EntityKey) -> CoreResult<()> {
    if key.is_kind::<T>() {
        Ok(())
    } else {
        Err(CoreError::KindMismatch {
            expected: T::KIND,
            actual: key.kind().to_owned(),
        })
    }
}

fn notify_closed(callbacks: Vec<Callback>) {
    let changes = ChangeSet::default();
    let error = CoreError::ContextClosed;
    for mut callback in callbacks {
        callback(&changes, Some(&error));
    }
}

/// A transactional view of the database, confined to one thread.
///
/// Created by [`ContextFactory::create_context`]. Closing the context, or
/// dropping it, releases everything it holds; its queries and managed
/// handles fail with `ContextClosed` afterwards.
///
/// # Example
///
/// ```rust,ignore
/// let context = factory.create_context()?;
///
/// let beatmaps = context.all::<Beatmap>()?;
/// beatmaps.subscribe(|query, changes, _| {
///     println!("{} inserted, now {}", changes.insertions.len(), query.count().unwrap());
/// })?;
///
/// context.write(|scope| {
///     scope.add(Beatmap::default())?;
///     Ok(())
/// })?;
/// ```
pub struct Context {
    inner: Rc<ContextInner>,
    /// False for the view [`ContextFactory::run`] lends out of the registry.
    owned: bool,
}

impl Context {
    fn owned(inner: Rc<ContextInner>) -> Self {
        Self { inner, owned: true }
    }

    fn borrowed(inner: Rc<ContextInner>) -> Self {
        Self {
            inner,
            owned: false,
        }
    }

    /// Returns the context's ID.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Returns how many times the visible snapshot has advanced.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation()
    }

    /// Returns the sequence of the newest commit this context sees.
    #[must_use]
    pub fn snapshot(&self) -> SequenceNumber {
        self.inner.snapshot.get()
    }

    /// Returns false once the context was closed, explicitly or by factory
    /// shutdown.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Returns the thread the context belongs to.
    #[must_use]
    pub fn owner_thread(&self) -> ThreadId {
        self.inner.control.owner
    }

    /// Runs `mutation` in a write transaction and commits it.
    ///
    /// The context refreshes first, and the transaction reads the newest
    /// committed state. If `mutation` fails or panics nothing is written.
    /// After the commit the context sees its own changes.
    ///
    /// # Errors
    ///
    /// Returns the mutation's error, a commit error, or `InvalidOperation`
    /// if a write transaction is already running on this thread.
    pub fn write<R>(
        &self,
        mutation: impl FnOnce(&mut WriteScope<'_>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        write::run(&self.inner, mutation)
    }

    /// Returns a live view of every entity of type `T`.
    pub fn all<T: Entity>(&self) -> CoreResult<Query<T>> {
        self.inner.enter()?;
        Ok(Query::new(&self.inner))
    }

    /// Looks up an entity of type `T` by ID.
    pub fn find<T: Entity>(&self, id: EntityId) -> CoreResult<Option<Managed<T>>> {
        self.inner.enter()?;
        let key = EntityKey::of::<T>(id);
        if self.inner.read_row(&key).is_none() {
            return Ok(None);
        }
        self.inner.resolve(&key).map(Some)
    }

    /// Resolves `key` in this context.
    ///
    /// # Errors
    ///
    /// - `KindMismatch` if `key` is not a `T` key
    /// - `EntityInvalid` if the row is not in the current snapshot
    pub fn resolve<T: Entity>(&self, key: &EntityKey) -> CoreResult<Managed<T>> {
        self.inner.enter()?;
        self.inner.resolve(key)
    }

    /// Resolves the target of a stored relation.
    pub fn resolve_link<T: Entity>(&self, link: &Link<T>) -> CoreResult<Managed<T>> {
        self.resolve(&link.key())
    }

    /// Subscribes to changes of `T` rows. See [`Query::subscribe`].
    pub fn subscribe<T, F>(&self, callback: F) -> CoreResult<SubscriptionToken>
    where
        T: Entity,
        F: FnMut(&Query<T>, &ChangeSet, Option<&CoreError>) + 'static,
    {
        self.all::<T>()?.subscribe(callback)
    }

    /// Removes a subscription. Returns false if it was not registered here.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        token.context() == self.inner.id && self.inner.hub.borrow_mut().unsubscribe(token)
    }

    /// Moves to the newest commit, firing due notifications before
    /// returning. Returns true if anything new became visible.
    ///
    /// # Errors
    ///
    /// `ContextClosed`, or `InvalidOperation` inside a write transaction.
    pub fn refresh(&self) -> CoreResult<bool> {
        self.inner.refresh()
    }

    /// Closes the context.
    pub fn close(self) {}
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.owned {
            drop(self.inner.release());
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("open", &self.is_open())
            .field("snapshot", &self.snapshot())
            .field("generation", &self.generation())
            .field("subscriptions", &self.inner.hub.borrow().len())
            .finish()
    }
}
