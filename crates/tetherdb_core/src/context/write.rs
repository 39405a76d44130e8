//! Write transactions.

use super::{registry, ContextInner};
use crate::entity::{self, Entity, EntityId, EntityKey};
use crate::error::{CoreError, CoreResult};
use crate::managed::Managed;
use crate::store::WriteOp;
use crate::types::SequenceNumber;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Uncommitted state of the write transaction a context is running.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    read_seq: SequenceNumber,
    ops: Vec<WriteOp>,
    /// Rows written so far; `None` marks a removal.
    overlay: HashMap<EntityKey, Option<Arc<[u8]>>>,
    /// Keys added by this transaction, in insert order.
    inserted: Vec<EntityKey>,
}

impl PendingWrite {
    fn new(read_seq: SequenceNumber) -> Self {
        Self {
            read_seq,
            ops: Vec::new(),
            overlay: HashMap::new(),
            inserted: Vec::new(),
        }
    }

    /// Sequence the transaction reads committed rows at.
    pub(crate) fn read_seq(&self) -> SequenceNumber {
        self.read_seq
    }

    /// Returns the transaction's own version of `key`, if it wrote one.
    pub(crate) fn lookup(&self, key: &EntityKey) -> Option<Option<Arc<[u8]>>> {
        self.overlay.get(key).cloned()
    }

    fn put(&mut self, key: EntityKey, payload: Vec<u8>, inserted: bool) {
        if inserted {
            self.inserted.push(key.clone());
        }
        self.overlay
            .insert(key.clone(), Some(Arc::from(payload.as_slice())));
        self.ops.push(WriteOp::Put { key, payload });
    }

    fn remove(&mut self, key: EntityKey) {
        self.inserted.retain(|added| *added != key);
        self.overlay.insert(key.clone(), None);
        self.ops.push(WriteOp::Remove { key });
    }

    /// Applies the transaction's writes to the committed keys of `kind`.
    pub(crate) fn merge_keys(&self, kind: &str, committed: Vec<EntityKey>) -> Vec<EntityKey> {
        committed
            .into_iter()
            .filter(|key| {
                !matches!(self.overlay.get(key), Some(None)) && !self.inserted.contains(key)
            })
            .chain(
                self.inserted
                    .iter()
                    .filter(|key| key.kind() == kind)
                    .cloned(),
            )
            .collect()
    }
}

/// Ends the transaction when dropped, whether it committed, failed or
/// unwound. Keys it added are no longer resolved.
struct TransactionGuard<'a> {
    context: &'a ContextInner,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        let pending = self
            .context
            .pending
            .try_borrow_mut()
            .ok()
            .and_then(|mut pending| pending.take());
        if let Some(pending) = pending {
            if let Ok(mut resolved) = self.context.resolved.try_borrow_mut() {
                for key in &pending.inserted {
                    resolved.remove(key);
                }
            }
        }
    }
}

/// Runs `mutation` as one atomic write transaction on `context`.
pub(crate) fn run<R>(
    context: &Rc<ContextInner>,
    mutation: impl FnOnce(&mut WriteScope<'_>) -> CoreResult<R>,
) -> CoreResult<R> {
    context.enter()?;
    if context.in_write() {
        return Err(CoreError::invalid_operation(
            "write transactions cannot be nested",
        ));
    }
    if registry::open_contexts(context.factory())
        .iter()
        .any(|other| other.in_write())
    {
        return Err(CoreError::invalid_operation(
            "another context on this thread is inside a write transaction",
        ));
    }

    // Due notifications fire here, before the writer lock is taken, so
    // callbacks may write themselves.
    context.refresh()?;

    let store = &context.factory().store;
    let lock = store.begin_write();
    *context.pending.borrow_mut() = Some(PendingWrite::new(store.committed_seq()));
    let guard = TransactionGuard {
        context: context.as_ref(),
    };

    let mut scope = WriteScope { context };
    let value = match mutation(&mut scope) {
        Ok(value) if context.is_open() => value,
        Ok(_) => {
            tracing::debug!(context = %context.id(), "write transaction aborted: context closed");
            return Err(CoreError::ContextClosed);
        }
        Err(err) => {
            tracing::debug!(context = %context.id(), error = %err, "write transaction aborted");
            return Err(err);
        }
    };

    let Some(pending) = context.pending.borrow_mut().take() else {
        return Err(CoreError::ContextClosed);
    };
    let PendingWrite { ops, inserted, .. } = pending;

    let sequence = match store.commit(&lock, ops) {
        Ok(sequence) => sequence,
        Err(err) => {
            let mut resolved = context.resolved.borrow_mut();
            for key in &inserted {
                resolved.remove(key);
            }
            tracing::debug!(context = %context.id(), error = %err, "write transaction aborted");
            return Err(err);
        }
    };

    drop(guard);
    drop(lock);

    context.advance_to(sequence);
    context.factory().vacuum();
    Ok(value)
}

/// The mutable view handed to [`crate::Context::write`].
///
/// Reads through the scope, and through the context's [`Managed`] handles
/// while the transaction runs, see the transaction's own writes. Nothing
/// is visible to other contexts until the transaction commits.
pub struct WriteScope<'a> {
    context: &'a Rc<ContextInner>,
}

impl WriteScope<'_> {
    fn with_pending<R>(&self, f: impl FnOnce(&mut PendingWrite) -> R) -> CoreResult<R> {
        let mut pending = self.context.pending.borrow_mut();
        pending.as_mut().map(f).ok_or(CoreError::ContextClosed)
    }

    /// Adds `entity` under a fresh key and returns its managed handle.
    pub fn add<T: Entity>(&mut self, entity: T) -> CoreResult<Managed<T>> {
        self.add_with_id(EntityId::new(), entity)
    }

    /// Adds `entity` under `id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a row with that key already exists.
    pub fn add_with_id<T: Entity>(&mut self, id: EntityId, entity: T) -> CoreResult<Managed<T>> {
        let key = EntityKey::of::<T>(id);
        if self.context.read_row(&key).is_some() {
            return Err(CoreError::invalid_operation(format!(
                "{key} already exists"
            )));
        }

        let payload = entity::encode(&entity)?;
        self.with_pending(|pending| pending.put(key.clone(), payload, true))?;
        self.context.resolve(&key)
    }

    /// Changes a managed entity in place.
    pub fn modify<T: Entity, R>(
        &mut self,
        managed: &Managed<T>,
        f: impl FnOnce(&mut T) -> R,
    ) -> CoreResult<R> {
        self.modify_key(managed.key(), f)
    }

    /// Loads the row at `key`, changes it and writes it back.
    ///
    /// # Errors
    ///
    /// Returns `EntityInvalid` if the row does not exist.
    pub fn modify_key<T: Entity, R>(
        &mut self,
        key: &EntityKey,
        f: impl FnOnce(&mut T) -> R,
    ) -> CoreResult<R> {
        let mut value: T = self.context.read(key)?;
        let result = f(&mut value);
        let payload = entity::encode(&value)?;
        self.with_pending(|pending| pending.put(key.clone(), payload, false))?;
        self.context.mark_resolved(key);
        Ok(result)
    }

    /// Removes a managed entity.
    pub fn remove<T: Entity>(&mut self, managed: &Managed<T>) -> CoreResult<()> {
        self.remove_key(managed.key())
    }

    /// Removes the row at `key`.
    ///
    /// # Errors
    ///
    /// Returns `EntityInvalid` if the row does not exist.
    pub fn remove_key(&mut self, key: &EntityKey) -> CoreResult<()> {
        if self.context.read_row(key).is_none() {
            return Err(CoreError::entity_invalid(key.clone()));
        }
        self.with_pending(|pending| pending.remove(key.clone()))
    }

    /// Looks up an entity of type `T` by ID.
    pub fn find<T: Entity>(&self, id: EntityId) -> CoreResult<Option<Managed<T>>> {
        let key = EntityKey::of::<T>(id);
        if self.context.read_row(&key).is_none() {
            return Ok(None);
        }
        self.context.resolve(&key).map(Some)
    }

    /// Resolves `key` as an entity of type `T`.
    pub fn resolve<T: Entity>(&self, key: &EntityKey) -> CoreResult<Managed<T>> {
        self.context.resolve(key)
    }

    /// Returns the number of `T` rows, including this transaction's writes.
    #[must_use]
    pub fn count<T: Entity>(&self) -> usize {
        self.context.count_of(T::KIND)
    }
}
