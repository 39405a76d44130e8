//! # TetherDB Storage
//!
//! Byte stores that hold the TetherDB commit log.
//!
//! A backend knows nothing about commits, entities or contexts: it appends
//! opaque frames, reads them back by offset and makes them durable on request.
//! Frame layout and replay belong to `tetherdb_core`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral databases and tests
//! - [`FileBackend`] - a single append-only file
//!
//! ## Example
//!
//! ```rust
//! use tetherdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut log = InMemoryBackend::new();
//! let offset = log.append(b"commit-1").unwrap();
//! assert_eq!(log.read_at(offset, 8).unwrap(), b"commit-1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
