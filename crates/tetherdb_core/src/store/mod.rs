//! The embedded storage engine behind every context.
//!
//! The engine owns committed state only. It knows nothing about threads or
//! contexts: callers pass the snapshot they read at, and commits are
//! serialized by a single writer lock.
//!
//! ## Commit Path
//!
//! 1. Acquire the writer lock ([`Store::begin_write`])
//! 2. Append the commit frame to the log and sync it
//! 3. Apply the operations to the version store
//! 4. Publish the new committed sequence
//!
//! A commit that fails before step 3 leaves the version store untouched.

mod log;
mod record;
mod versions;

pub use record::{CommitRecord, WriteOp, FRAME_MAGIC};

use self::log::CommitLog;
use self::versions::VersionStore;
use crate::entity::EntityKey;
use crate::error::{CoreError, CoreResult};
use crate::notify::ChangeSet;
use crate::types::SequenceNumber;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tetherdb_storage::StorageBackend;

/// Proof that the caller holds the writer lock.
pub(crate) struct WriteGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Committed database state shared by every context of a factory.
#[derive(Debug)]
pub(crate) struct Store {
    versions: RwLock<VersionStore>,
    log: CommitLog,
    committed: AtomicU64,
    write_lock: Mutex<()>,
}

impl Store {
    /// Opens the engine over `backend`, replaying any commits it holds.
    pub(crate) fn open(
        backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
        format_version: u16,
    ) -> CoreResult<Self> {
        let log = CommitLog::new(backend, sync_on_commit, format_version);
        let records = log.replay()?;

        let mut versions = VersionStore::new();
        let mut committed = SequenceNumber::ZERO;
        for record in &records {
            if record.sequence <= committed {
                return Err(CoreError::invalid_format(format!(
                    "commit {} follows {}",
                    record.sequence, committed
                )));
            }
            versions.apply(record.sequence, &record.ops);
            committed = record.sequence;
        }
        // No context exists yet, so only the newest versions matter.
        versions.vacuum(committed);

        tracing::debug!(
            commits = records.len(),
            sequence = %committed,
            "commit log replayed"
        );

        Ok(Self {
            versions: RwLock::new(versions),
            log,
            committed: AtomicU64::new(committed.as_u64()),
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the newest committed sequence.
    pub(crate) fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed.load(Ordering::Acquire))
    }

    /// Blocks until this thread is the only writer.
    pub(crate) fn begin_write(&self) -> WriteGuard<'_> {
        WriteGuard {
            _guard: self.write_lock.lock(),
        }
    }

    /// Commits `ops` and returns the new sequence.
    ///
    /// An empty commit changes nothing and returns the current sequence.
    pub(crate) fn commit(
        &self,
        _guard: &WriteGuard<'_>,
        ops: Vec<WriteOp>,
    ) -> CoreResult<SequenceNumber> {
        let current = self.committed_seq();
        if ops.is_empty() {
            return Ok(current);
        }

        let record = CommitRecord {
            sequence: current.next(),
            ops,
        };
        self.log.append(&record)?;
        self.versions.write().apply(record.sequence, &record.ops);
        self.committed
            .store(record.sequence.as_u64(), Ordering::Release);

        tracing::debug!(
            sequence = %record.sequence,
            ops = record.ops.len(),
            "write transaction committed"
        );
        Ok(record.sequence)
    }

    pub(crate) fn get_at(&self, key: &EntityKey, seq: SequenceNumber) -> Option<Arc<[u8]>> {
        self.versions.read().get_at(key, seq)
    }

    pub(crate) fn keys_at(&self, kind: &str, seq: SequenceNumber) -> Vec<EntityKey> {
        self.versions.read().keys_at(kind, seq)
    }

    pub(crate) fn count_at(&self, kind: &str, seq: SequenceNumber) -> usize {
        self.versions.read().count_at(kind, seq)
    }

    /// Computes one changeset per kind for a move from `from` to `to`.
    pub(crate) fn changes_between(
        &self,
        kinds: &[&'static str],
        from: SequenceNumber,
        to: SequenceNumber,
    ) -> Vec<(&'static str, ChangeSet)> {
        let versions = self.versions.read();
        kinds
            .iter()
            .map(|kind| (*kind, versions.changes_between(kind, from, to)))
            .collect()
    }

    pub(crate) fn vacuum(&self, min_seq: SequenceNumber) {
        self.versions.write().vacuum(min_seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use tetherdb_storage::InMemoryBackend;

    fn put(key: &EntityKey, byte: u8) -> WriteOp {
        WriteOp::Put {
            key: key.clone(),
            payload: vec![byte],
        }
    }

    #[test]
    fn commits_are_sequenced() {
        let store = Store::open(Box::new(InMemoryBackend::new()), true, 1).unwrap();
        let key = EntityKey::new("beatmap", EntityId::new());

        let guard = store.begin_write();
        let first = store.commit(&guard, vec![put(&key, 1)]).unwrap();
        let second = store.commit(&guard, vec![put(&key, 2)]).unwrap();
        let empty = store.commit(&guard, Vec::new()).unwrap();

        assert_eq!(first, SequenceNumber::new(1));
        assert_eq!(second, SequenceNumber::new(2));
        assert_eq!(empty, second);
        assert_eq!(store.committed_seq(), second);
        assert_eq!(store.get_at(&key, first).as_deref(), Some(&[1u8][..]));
    }

    #[test]
    fn reopen_recovers_committed_rows() {
        let backend = InMemoryBackend::new();
        let key = EntityKey::new("beatmap", EntityId::new());
        {
            let store = Store::open(Box::new(backend.clone()), true, 1).unwrap();
            let guard = store.begin_write();
            store.commit(&guard, vec![put(&key, 1)]).unwrap();
            store.commit(&guard, vec![put(&key, 7)]).unwrap();
        }

        let store = Store::open(Box::new(backend), true, 1).unwrap();
        assert_eq!(store.committed_seq(), SequenceNumber::new(2));
        assert_eq!(
            store.get_at(&key, store.committed_seq()).as_deref(),
            Some(&[7u8][..])
        );
        assert_eq!(store.count_at("beatmap", store.committed_seq()), 1);
    }

    #[test]
    fn out_of_order_log_is_rejected() {
        let key = EntityKey::new("beatmap", EntityId::new());
        let mut bytes = Vec::new();
        for seq in [2, 1] {
            let record = CommitRecord {
                sequence: SequenceNumber::new(seq),
                ops: vec![put(&key, 0)],
            };
            bytes.extend(record.encode_frame(1).unwrap());
        }

        let result = Store::open(Box::new(InMemoryBackend::with_data(bytes)), true, 1);
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }
}
