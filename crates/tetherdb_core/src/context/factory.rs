//! The context factory and the pool of open contexts.

use super::{registry, Context, ContextInner};
use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::entity::{Entity, EntityKey};
use crate::error::{CoreError, CoreResult};
use crate::store::Store;
use crate::types::{ContextId, SequenceNumber};
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tetherdb_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// The cross-thread half of a context.
///
/// The pool holds one of these per open context so other threads can see
/// its snapshot (for vacuuming), close it at shutdown, or ask for a refresh.
#[derive(Debug)]
pub(crate) struct ContextControl {
    pub(crate) owner: ThreadId,
    snapshot: AtomicU64,
    closed: AtomicBool,
    refresh_requested: AtomicBool,
}

impl ContextControl {
    fn new(owner: ThreadId, snapshot: SequenceNumber) -> Self {
        Self {
            owner,
            snapshot: AtomicU64::new(snapshot.as_u64()),
            closed: AtomicBool::new(false),
            refresh_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn snapshot(&self) -> SequenceNumber {
        SequenceNumber::new(self.snapshot.load(Ordering::Acquire))
    }

    pub(crate) fn publish_snapshot(&self, snapshot: SequenceNumber) {
        self.snapshot.store(snapshot.as_u64(), Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Clears and returns the pending refresh request.
    pub(crate) fn take_refresh_request(&self) -> bool {
        self.refresh_requested.swap(false, Ordering::AcqRel)
    }
}

/// State shared by every handle of one factory, its contexts and the
/// live references resolved through it.
pub(crate) struct FactoryShared {
    config: Config,
    pub(crate) store: Store,
    /// Held only to register or deregister a context, never across a
    /// transaction.
    pool: Mutex<Vec<Arc<ContextControl>>>,
    shut_down: AtomicBool,
    next_context_id: AtomicU64,
    /// Released at shutdown so the directory can be reopened while
    /// references to the old factory are still around.
    dir: Mutex<Option<DatabaseDir>>,
}

impl FactoryShared {
    fn open(
        config: Config,
        backend: Box<dyn StorageBackend>,
        dir: Option<DatabaseDir>,
    ) -> CoreResult<Arc<Self>> {
        let store = Store::open(backend, config.sync_on_commit, config.format_version.0)?;

        match &dir {
            Some(dir) => tracing::info!(
                path = %dir.path().display(),
                sequence = %store.committed_seq(),
                "context factory opened"
            ),
            None => tracing::info!(
                sequence = %store.committed_seq(),
                "context factory opened without a directory"
            ),
        }

        Ok(Arc::new(Self {
            config,
            store,
            pool: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
            next_context_id: AtomicU64::new(0),
            dir: Mutex::new(dir),
        }))
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Opens a context bound to the calling thread at the newest commit.
    pub(crate) fn create_context(self: &Arc<Self>) -> CoreResult<Context> {
        let id = ContextId::new(self.next_context_id.fetch_add(1, Ordering::Relaxed) + 1);
        let owner = thread::current().id();

        let control = {
            let mut pool = self.pool.lock();
            if self.is_shut_down() {
                return Err(CoreError::FactoryShutdown);
            }
            // Read under the pool lock so a concurrent vacuum never drops
            // versions this snapshot needs.
            let control = Arc::new(ContextControl::new(owner, self.store.committed_seq()));
            pool.push(Arc::clone(&control));
            control
        };

        tracing::debug!(
            context = %id,
            sequence = %control.snapshot(),
            "context created"
        );

        let inner = Rc::new(ContextInner::new(id, Arc::clone(self), control));
        registry::register(&inner);
        Ok(Context::owned(inner))
    }

    /// Runs `f` against the newest open context on this thread, or against
    /// a transient one closed when `f` returns.
    pub(crate) fn run<R>(
        self: &Arc<Self>,
        f: impl FnOnce(&Context) -> CoreResult<R>,
    ) -> CoreResult<R> {
        if let Some(inner) = registry::open_contexts(self).pop() {
            return f(&Context::borrowed(inner));
        }

        let context = self.create_context()?;
        let result = f(&context);
        context.close();
        result
    }

    /// Brings every open context of this factory on the calling thread to
    /// the newest commit, firing their due notifications.
    ///
    /// Contexts inside a write transaction are left alone; they already
    /// read at the newest commit.
    pub(crate) fn refresh_thread(self: &Arc<Self>) -> CoreResult<()> {
        for context in registry::open_contexts(self) {
            if context.in_write() {
                continue;
            }
            match context.refresh() {
                Ok(_) | Err(CoreError::ContextClosed) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Reads `key` through the newest context on this thread that has it
    /// resolved, without refreshing.
    pub(crate) fn read_resolved<T: Entity>(self: &Arc<Self>, key: &EntityKey) -> CoreResult<T> {
        registry::open_contexts(self)
            .into_iter()
            .rev()
            .find(|context| context.is_resolved(key))
            .ok_or_else(|| CoreError::invalid_scope_access(key.clone()))?
            .read(key)
    }

    pub(crate) fn deregister(&self, control: &Arc<ContextControl>) {
        self.pool.lock().retain(|entry| !Arc::ptr_eq(entry, control));
    }

    /// Drops row versions no open context can observe.
    pub(crate) fn vacuum(&self) {
        if !self.config.vacuum_on_commit {
            return;
        }
        let min_seq = {
            let pool = self.pool.lock();
            let committed = self.store.committed_seq();
            pool.iter()
                .map(|control| control.snapshot())
                .fold(committed, SequenceNumber::min)
        };
        self.store.vacuum(min_seq);
    }

    fn refresh_all(&self) {
        for control in self.pool.lock().iter() {
            control.refresh_requested.store(true, Ordering::Release);
        }
    }

    fn open_context_count(&self) -> usize {
        self.pool.lock().len()
    }

    fn shutdown(&self) {
        let closed = {
            let mut pool = self.pool.lock();
            if self.shut_down.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *pool)
        };

        for control in &closed {
            control.mark_closed();
        }
        if !closed.is_empty() {
            tracing::warn!(
                contexts = closed.len(),
                "closing contexts still open at shutdown"
            );
        }

        self.dir.lock().take();
        tracing::info!(sequence = %self.store.committed_seq(), "context factory shut down");
    }
}

impl fmt::Debug for FactoryShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryShared")
            .field("committed", &self.store.committed_seq())
            .field("open_contexts", &self.open_context_count())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// Shuts the factory down when the last handle goes away.
struct FactoryLifetime {
    shared: Arc<FactoryShared>,
}

impl Drop for FactoryLifetime {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// Creates thread-confined [`Context`]s over one database.
///
/// The factory is `Send + Sync` and cheap to clone; clones share the same
/// database and pool. Dropping the last clone shuts the factory down.
///
/// # Example
///
/// ```rust,ignore
/// use tetherdb_core::ContextFactory;
///
/// let factory = ContextFactory::open_in_memory()?;
///
/// let context = factory.create_context()?;
/// let beatmap = context.write(|scope| scope.add(Beatmap::default()))?;
/// let live = beatmap.to_live();
///
/// std::thread::spawn(move || {
///     let hidden = live.perform_read(|b| b.hidden)?;
///     Ok::<_, tetherdb_core::CoreError>(hidden)
/// });
/// ```
#[derive(Clone)]
pub struct ContextFactory {
    shared: Arc<FactoryShared>,
    _lifetime: Arc<FactoryLifetime>,
}

impl ContextFactory {
    /// Opens a factory over a fresh in-memory database.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Config::default(), Box::new(InMemoryBackend::new()))
    }

    /// Opens a factory over a database directory.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseLocked` if another factory holds the directory, or
    /// a log error if recovery fails.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a factory over a database directory with custom configuration.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.commit_log_path())?;
        FactoryShared::open(config, Box::new(backend), Some(dir)).map(Self::from_shared)
    }

    /// Opens a factory over an already configured backend.
    ///
    /// Lower level than [`ContextFactory::open`]; no directory lock is taken.
    pub fn open_with_backend(config: Config, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        FactoryShared::open(config, backend, None).map(Self::from_shared)
    }

    fn from_shared(shared: Arc<FactoryShared>) -> Self {
        Self {
            _lifetime: Arc::new(FactoryLifetime {
                shared: Arc::clone(&shared),
            }),
            shared,
        }
    }

    /// Creates a context bound to the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `FactoryShutdown` once the factory was shut down.
    pub fn create_context(&self) -> CoreResult<Context> {
        self.shared.create_context()
    }

    /// Runs `f` against a context on the calling thread.
    ///
    /// Reuses the most recently opened context of this factory on the
    /// thread. If there is none, a transient context is created for `f` and
    /// closed afterwards.
    pub fn run<R>(&self, f: impl FnOnce(&Context) -> CoreResult<R>) -> CoreResult<R> {
        self.shared.run(f)
    }

    /// Asks every open context to refresh.
    ///
    /// Contexts refresh on their own thread, at the start of their next
    /// operation.
    pub fn refresh_all(&self) {
        self.shared.refresh_all();
    }

    /// Closes every open context and rejects new ones.
    ///
    /// Owners observe `ContextClosed` on their next use and their
    /// subscribers are told once. Calling this again does nothing.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Returns true once the factory was shut down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }

    /// Returns the number of open contexts across all threads.
    #[must_use]
    pub fn open_context_count(&self) -> usize {
        self.shared.open_context_count()
    }

    /// Returns the newest committed sequence.
    #[must_use]
    pub fn committed_sequence(&self) -> SequenceNumber {
        self.shared.store.committed_seq()
    }

    /// Returns the configuration the factory was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        self.shared.config()
    }
}

impl fmt::Debug for ContextFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextFactory")
            .field("committed", &self.committed_sequence())
            .field("open_contexts", &self.open_context_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn factory_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ContextFactory>();
    }

    #[test]
    fn contexts_are_counted() {
        let factory = ContextFactory::open_in_memory().unwrap();
        let first = factory.create_context().unwrap();
        let second = factory.create_context().unwrap();
        assert_eq!(factory.open_context_count(), 2);
        assert_ne!(first.id(), second.id());

        first.close();
        assert_eq!(factory.open_context_count(), 1);
        drop(second);
        assert_eq!(factory.open_context_count(), 0);
    }

    #[test]
    fn run_reuses_newest_context() {
        let factory = ContextFactory::open_in_memory().unwrap();
        let _older = factory.create_context().unwrap();
        let newer = factory.create_context().unwrap();

        let used = factory.run(|context| Ok(context.id())).unwrap();
        assert_eq!(used, newer.id());
        assert_eq!(factory.open_context_count(), 2);
    }

    #[test]
    fn run_without_context_is_transient() {
        let factory = ContextFactory::open_in_memory().unwrap();
        let open_inside = factory.run(|context| Ok(context.is_open())).unwrap();
        assert!(open_inside);
        assert_eq!(factory.open_context_count(), 0);
        assert_eq!(registry::registered_count(), 0);
    }

    #[test]
    fn shutdown_rejects_new_contexts() {
        let factory = ContextFactory::open_in_memory().unwrap();
        factory.shutdown();
        factory.shutdown();
        assert!(factory.is_shut_down());
        assert!(matches!(
            factory.create_context(),
            Err(CoreError::FactoryShutdown)
        ));
    }

    #[test]
    fn shutdown_releases_directory_lock() {
        let temp = tempdir().unwrap();
        let factory = ContextFactory::open(temp.path()).unwrap();
        assert!(matches!(
            ContextFactory::open(temp.path()),
            Err(CoreError::DatabaseLocked)
        ));

        factory.shutdown();
        assert!(ContextFactory::open(temp.path()).is_ok());
    }

    #[test]
    fn dropping_last_handle_shuts_down() {
        let temp = tempdir().unwrap();
        let factory = ContextFactory::open(temp.path()).unwrap();
        let clone = factory.clone();
        drop(factory);
        assert!(!clone.is_shut_down());
        drop(clone);

        assert!(ContextFactory::open(temp.path()).is_ok());
    }
}
