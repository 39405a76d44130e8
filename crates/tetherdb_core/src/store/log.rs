//! Append-only commit log.

use crate::error::CoreResult;
use crate::store::record::CommitRecord;
use parking_lot::Mutex;
use std::fmt;
use tetherdb_storage::StorageBackend;

/// Writes one frame per commit and replays them on open.
pub(crate) struct CommitLog {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_commit: bool,
    version: u16,
}

impl CommitLog {
    pub(crate) fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool, version: u16) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_commit,
            version,
        }
    }

    /// Appends a commit and makes it durable before returning.
    ///
    /// On failure the log is cut back to where the frame started, so a
    /// rejected commit never reappears on replay.
    pub(crate) fn append(&self, record: &CommitRecord) -> CoreResult<u64> {
        let frame = record.encode_frame(self.version)?;

        let mut backend = self.backend.lock();
        let start = backend.size()?;
        let written = backend.append(&frame).and_then(|offset| {
            if self.sync_on_commit {
                backend.sync()?;
            } else {
                backend.flush()?;
            }
            Ok(offset)
        });

        match written {
            Ok(offset) => Ok(offset),
            Err(err) => {
                if let Err(undo) = backend.truncate(start) {
                    tracing::error!(
                        offset = start,
                        error = %undo,
                        "failed to roll back rejected commit frame"
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Reads every complete commit in log order.
    ///
    /// A torn trailing frame is cut off so the next append starts on a
    /// frame boundary.
    pub(crate) fn replay(&self) -> CoreResult<Vec<CommitRecord>> {
        let mut backend = self.backend.lock();
        let data = backend.read_all()?;

        let mut records = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            match CommitRecord::decode_frame(&data, offset, self.version)? {
                Some((record, len)) => {
                    records.push(record);
                    offset += len;
                }
                None => {
                    tracing::warn!(
                        offset,
                        dropped = data.len() - offset,
                        "discarding torn commit log tail"
                    );
                    backend.truncate(offset as u64)?;
                    break;
                }
            }
        }

        Ok(records)
    }
}

impl fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitLog")
            .field("sync_on_commit", &self.sync_on_commit)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityId, EntityKey};
    use crate::store::record::WriteOp;
    use crate::types::SequenceNumber;
    use tetherdb_storage::InMemoryBackend;

    fn record(seq: u64) -> CommitRecord {
        CommitRecord {
            sequence: SequenceNumber::new(seq),
            ops: vec![WriteOp::Remove {
                key: EntityKey::new("beatmap", EntityId::new()),
            }],
        }
    }

    #[test]
    fn replay_returns_appended_commits() {
        let backend = InMemoryBackend::new();
        let log = CommitLog::new(Box::new(backend.clone()), true, 1);
        log.append(&record(1)).unwrap();
        log.append(&record(2)).unwrap();

        let reopened = CommitLog::new(Box::new(backend), true, 1);
        let sequences: Vec<u64> = reopened
            .replay()
            .unwrap()
            .iter()
            .map(|r| r.sequence.as_u64())
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let backend = InMemoryBackend::new();
        let log = CommitLog::new(Box::new(backend.clone()), false, 1);
        log.append(&record(1)).unwrap();
        let intact = backend.snapshot().len();

        let mut torn = backend.snapshot();
        torn.extend_from_slice(&record(2).encode_frame(1).unwrap()[..12]);
        let damaged = InMemoryBackend::with_data(torn);

        let reopened = CommitLog::new(Box::new(damaged.clone()), false, 1);
        assert_eq!(reopened.replay().unwrap().len(), 1);
        assert_eq!(damaged.snapshot().len(), intact);
    }
}
