//! Multi-version row storage.

use crate::entity::{EntityId, EntityKey};
use crate::notify::ChangeSet;
use crate::store::record::WriteOp;
use crate::types::SequenceNumber;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// One committed state of a row. `None` is a tombstone.
#[derive(Debug, Clone)]
struct Version {
    seq: SequenceNumber,
    payload: Option<Arc<[u8]>>,
}

/// Commit and operation index that first inserted a key.
type Created = (SequenceNumber, usize);

#[derive(Debug)]
struct Chain {
    /// Orders query results.
    created: Created,
    versions: Vec<Version>,
}

impl Chain {
    fn at(&self, seq: SequenceNumber) -> Option<&Version> {
        self.versions.iter().rev().find(|v| v.seq <= seq)
    }
}

/// Keys touched by one commit.
#[derive(Debug)]
struct CommitSummary {
    seq: SequenceNumber,
    touched: Vec<EntityKey>,
}

/// Committed rows at every sequence still observable by some context.
///
/// Each key owns a chain of versions ordered by sequence; a read at snapshot
/// `s` sees the newest version with `seq <= s`. Commit summaries are kept
/// alongside so a context moving from `a` to `b` can learn which keys
/// changed in between.
#[derive(Debug, Default)]
pub(crate) struct VersionStore {
    chains: HashMap<EntityKey, Chain>,
    by_kind: HashMap<String, BTreeSet<(Created, EntityId)>>,
    history: VecDeque<CommitSummary>,
}

impl VersionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Applies a commit's operations at `seq`.
    pub(crate) fn apply(&mut self, seq: SequenceNumber, ops: &[WriteOp]) {
        let mut touched = Vec::with_capacity(ops.len());

        for (index, op) in ops.iter().enumerate() {
            let key = op.key();
            match op {
                WriteOp::Put { payload, .. } => {
                    let chain = self.chains.entry(key.clone()).or_insert_with(|| Chain {
                        created: (seq, index),
                        versions: Vec::new(),
                    });
                    if chain.versions.is_empty() {
                        self.by_kind
                            .entry(key.kind().to_owned())
                            .or_default()
                            .insert((chain.created, key.id()));
                    }
                    chain.versions.push(Version {
                        seq,
                        payload: Some(Arc::from(payload.as_slice())),
                    });
                }
                WriteOp::Remove { .. } => match self.chains.get_mut(key) {
                    Some(chain) => chain.versions.push(Version { seq, payload: None }),
                    None => continue,
                },
            }
            touched.push(key.clone());
        }

        self.history.push_back(CommitSummary { seq, touched });
    }

    /// Returns the row payload visible at `seq`.
    pub(crate) fn get_at(&self, key: &EntityKey, seq: SequenceNumber) -> Option<Arc<[u8]>> {
        self.chains
            .get(key)
            .and_then(|chain| chain.at(seq))
            .and_then(|version| version.payload.clone())
    }

    pub(crate) fn exists_at(&self, key: &EntityKey, seq: SequenceNumber) -> bool {
        self.chains
            .get(key)
            .and_then(|chain| chain.at(seq))
            .is_some_and(|version| version.payload.is_some())
    }

    /// Returns the keys of `kind` visible at `seq`, oldest insert first.
    pub(crate) fn keys_at(&self, kind: &str, seq: SequenceNumber) -> Vec<EntityKey> {
        let Some(ids) = self.by_kind.get(kind) else {
            return Vec::new();
        };

        ids.iter()
            .filter(|((created, _), _)| *created <= seq)
            .map(|(_, id)| EntityKey::new(kind.to_owned(), *id))
            .filter(|key| self.exists_at(key, seq))
            .collect()
    }

    pub(crate) fn count_at(&self, kind: &str, seq: SequenceNumber) -> usize {
        self.keys_at(kind, seq).len()
    }

    /// Describes how `kind` changed between snapshots `from` and `to`.
    ///
    /// Only existence at the two ends matters: a row inserted and removed
    /// in between does not show up at all.
    pub(crate) fn changes_between(
        &self,
        kind: &str,
        from: SequenceNumber,
        to: SequenceNumber,
    ) -> ChangeSet {
        let mut seen = HashSet::new();
        let mut changes = ChangeSet::default();

        let touched = self
            .history
            .iter()
            .filter(|summary| summary.seq > from && summary.seq <= to)
            .flat_map(|summary| summary.touched.iter())
            .filter(|key| key.kind() == kind);

        for key in touched {
            if !seen.insert(key) {
                continue;
            }
            match (self.exists_at(key, from), self.exists_at(key, to)) {
                (false, true) => changes.insertions.push(key.clone()),
                (true, false) => changes.deletions.push(key.clone()),
                (true, true) => changes.modifications.push(key.clone()),
                (false, false) => {}
            }
        }

        changes
    }

    /// Drops versions and history no snapshot at or after `min_seq` needs.
    pub(crate) fn vacuum(&mut self, min_seq: SequenceNumber) {
        let mut dead = Vec::new();

        for (key, chain) in &mut self.chains {
            let visible = chain.versions.iter().rposition(|v| v.seq <= min_seq);
            if let Some(index) = visible {
                chain.versions.drain(..index);
            }
            let only_tombstone = chain.versions.len() == 1
                && chain.versions[0].payload.is_none()
                && chain.versions[0].seq <= min_seq;
            if only_tombstone {
                dead.push((key.clone(), chain.created));
            }
        }

        for (key, created) in dead {
            self.chains.remove(&key);
            if let Some(ids) = self.by_kind.get_mut(key.kind()) {
                ids.remove(&(created, key.id()));
            }
        }

        while self
            .history
            .front()
            .is_some_and(|summary| summary.seq <= min_seq)
        {
            self.history.pop_front();
        }
    }

    #[cfg(test)]
    pub(crate) fn version_count(&self) -> usize {
        self.chains.values().map(|chain| chain.versions.len()).sum()
    }
}
