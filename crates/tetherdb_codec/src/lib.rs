//! # TetherDB Codec
//!
//! CBOR encoding for everything TetherDB writes: entity payloads held in
//! the version store and commit records appended to the commit log.
//!
//! Any `serde` type can be encoded. Decoding is strict: the input must hold
//! exactly one CBOR item, so a payload spliced with garbage is rejected
//! instead of being silently accepted.
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use tetherdb_codec::{from_cbor, to_cbor};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Row {
//!     hidden: bool,
//!     title: String,
//! }
//!
//! let row = Row { hidden: false, title: "intro".into() };
//! let bytes = to_cbor(&row).unwrap();
//! assert_eq!(from_cbor::<Row>(&bytes).unwrap(), row);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;

pub use error::{CodecError, CodecResult};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes `value` as CBOR.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_cbor<T>(value: &T) -> CodecResult<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer).map_err(|err| CodecError::EncodingFailed {
        message: format!("{err:?}"),
    })?;
    Ok(buffer)
}

/// Decodes a single CBOR item from `bytes`.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes do not describe a
/// `T`, or [`CodecError::TrailingBytes`] if input remains after the item.
pub fn from_cbor<T>(bytes: &[u8]) -> CodecResult<T>
where
    T: DeserializeOwned,
{
    let mut reader = bytes;
    let value = ciborium::de::from_reader(&mut reader).map_err(|err| {
        CodecError::DecodingFailed {
            message: format!("{err:?}"),
        }
    })?;

    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes {
            count: reader.len(),
        });
    }
    Ok(value)
}
