//! Commit records and their log framing.

use crate::entity::EntityKey;
use crate::error::{CoreError, CoreResult};
use crate::types::SequenceNumber;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Magic bytes opening every commit frame.
pub const FRAME_MAGIC: [u8; 4] = *b"TDBC";

/// magic (4) + version (2) + length (4)
pub(crate) const HEADER_SIZE: usize = 10;

/// Truncated SHA-256 over header and payload.
pub(crate) const CHECKSUM_SIZE: usize = 8;

/// One mutation inside a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Insert or replace a row.
    Put {
        /// Row identity.
        key: EntityKey,
        /// Encoded entity.
        payload: Vec<u8>,
    },
    /// Remove a row.
    Remove {
        /// Row identity.
        key: EntityKey,
    },
}

impl WriteOp {
    /// Returns the key the operation touches.
    #[must_use]
    pub fn key(&self) -> &EntityKey {
        match self {
            Self::Put { key, .. } | Self::Remove { key } => key,
        }
    }
}

/// Everything one write transaction committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Sequence assigned at commit.
    pub sequence: SequenceNumber,
    /// Mutations in the order they were made.
    pub ops: Vec<WriteOp>,
}

impl CommitRecord {
    /// Frames the record for the commit log.
    ///
    /// ```text
    /// | magic (4) | version (2) | length (4) | CBOR payload (N) | checksum (8) |
    /// ```
    pub fn encode_frame(&self, version: u16) -> CoreResult<Vec<u8>> {
        let payload = tetherdb_codec::to_cbor(self)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("commit record too large"))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
        frame.extend_from_slice(&FRAME_MAGIC);
        frame.extend_from_slice(&version.to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let checksum = frame_checksum(&frame);
        frame.extend_from_slice(&checksum);
        Ok(frame)
    }

    /// Decodes the frame starting at `offset` in `data`.
    ///
    /// Returns the record and the frame length, or `None` if the bytes end
    /// before the frame does. A short tail is what a crash mid-append leaves
    /// behind; damaged complete frames are errors.
    pub fn decode_frame(
        data: &[u8],
        offset: usize,
        version: u16,
    ) -> CoreResult<Option<(Self, usize)>> {
        let rest = &data[offset..];
        if rest.len() < HEADER_SIZE {
            return Ok(None);
        }

        if rest[..4] != FRAME_MAGIC {
            return Err(CoreError::log_corruption(offset as u64, "bad frame magic"));
        }

        let frame_version = u16::from_le_bytes([rest[4], rest[5]]);
        if frame_version != version {
            return Err(CoreError::invalid_format(format!(
                "commit log frame version {frame_version}, expected {version}"
            )));
        }

        let len = u32::from_le_bytes([rest[6], rest[7], rest[8], rest[9]]) as usize;
        let body_end = HEADER_SIZE + len;
        let frame_len = body_end + CHECKSUM_SIZE;
        if rest.len() < frame_len {
            return Ok(None);
        }

        if frame_checksum(&rest[..body_end])[..] != rest[body_end..frame_len] {
            return Err(CoreError::ChecksumMismatch {
                offset: offset as u64,
            });
        }

        let record = tetherdb_codec::from_cbor(&rest[HEADER_SIZE..body_end])
            .map_err(|err| CoreError::log_corruption(offset as u64, err.to_string()))?;
        Ok(Some((record, frame_len)))
    }
}

fn frame_checksum(bytes: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = Sha256::digest(bytes);
    let mut checksum = [0u8; CHECKSUM_SIZE];
    checksum.copy_from_slice(&digest[..CHECKSUM_SIZE]);
    checksum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;

    fn sample() -> CommitRecord {
        let key = EntityKey::new("beatmap", EntityId::from_bytes([7; 16]));
        CommitRecord {
            sequence: SequenceNumber::new(3),
            ops: vec![
                WriteOp::Put {
                    key: key.clone(),
                    payload: vec![0xa0],
                },
                WriteOp::Remove { key },
            ],
        }
    }

    #[test]
    fn frame_decodes_to_same_record() {
        let frame = sample().encode_frame(1).unwrap();
        let (record, len) = CommitRecord::decode_frame(&frame, 0, 1).unwrap().unwrap();
        assert_eq!(record, sample());
        assert_eq!(len, frame.len());
    }

    #[test]
    fn short_tail_is_not_an_error() {
        let frame = sample().encode_frame(1).unwrap();
        for cut in [3, HEADER_SIZE, frame.len() - 1] {
            assert!(CommitRecord::decode_frame(&frame[..cut], 0, 1)
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn flipped_payload_bit_fails_checksum() {
        let mut frame = sample().encode_frame(1).unwrap();
        frame[HEADER_SIZE + 2] ^= 0x01;
        assert!(matches!(
            CommitRecord::decode_frame(&frame, 0, 1),
            Err(CoreError::ChecksumMismatch { offset: 0 })
        ));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut frame = sample().encode_frame(1).unwrap();
        frame[0] = b'X';
        assert!(matches!(
            CommitRecord::decode_frame(&frame, 0, 1),
            Err(CoreError::LogCorruption { .. })
        ));
    }

    #[test]
    fn other_version_is_rejected() {
        let frame = sample().encode_frame(2).unwrap();
        assert!(matches!(
            CommitRecord::decode_frame(&frame, 0, 1),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
