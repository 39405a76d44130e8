//! Backends that fail on demand.

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tetherdb_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};

/// An in-memory backend whose next `sync` calls can be made to fail.
///
/// Clones share both the bytes and the armed failures, so a test keeps one
/// handle to arm failures and inspect the bytes after handing another to a
/// factory.
#[derive(Debug, Default, Clone)]
pub struct FailingSyncBackend {
    inner: InMemoryBackend,
    failures: Arc<Mutex<usize>>,
}

impl FailingSyncBackend {
    /// Creates an empty backend that syncs normally.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` sync calls fail.
    pub fn fail_next_syncs(&self, count: usize) {
        *self.failures.lock() = count;
    }

    /// Returns a plain backend over the same bytes, for reopening.
    #[must_use]
    pub fn bytes(&self) -> InMemoryBackend {
        self.inner.clone()
    }
}

impl StorageBackend for FailingSyncBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(StorageError::Io(io::Error::other("injected sync failure")));
        }
        drop(failures);
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armed_failures_are_consumed() {
        let mut backend = FailingSyncBackend::new();
        backend.append(b"frame").unwrap();
        backend.fail_next_syncs(1);

        assert!(backend.sync().is_err());
        assert!(backend.sync().is_ok());
        assert_eq!(backend.bytes().snapshot(), b"frame");
    }
}
