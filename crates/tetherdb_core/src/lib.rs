//! # TetherDB Core
//!
//! Thread-confined contexts and live references over an embedded,
//! versioned entity store.
//!
//! This crate provides:
//! - [`ContextFactory`] for opening databases and creating contexts
//! - [`Context`], a transactional view pinned to one thread
//! - [`Managed`] handles and [`Query`] views bound to a context
//! - [`LiveRef`], a `Send + Sync` reference that re-resolves on any thread
//! - Change notifications with batched [`ChangeSet`]s
//! - A durable, checksummed commit log with crash recovery
//!
//! ## Example
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use tetherdb_core::{ContextFactory, Entity, IntoLive};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Beatmap {
//!     title: String,
//!     hidden: bool,
//! }
//!
//! impl Entity for Beatmap {
//!     const KIND: &'static str = "beatmap";
//! }
//!
//! let factory = ContextFactory::open_in_memory().unwrap();
//! let context = factory.create_context().unwrap();
//!
//! let live = context
//!     .write(|scope| {
//!         scope.add(Beatmap {
//!             title: "Triumph & Regret".into(),
//!             hidden: false,
//!         })
//!     })
//!     .unwrap()
//!     .to_live();
//!
//! let handle = std::thread::spawn(move || {
//!     live.perform_write(|beatmap| beatmap.hidden = true).unwrap();
//!     live.perform_read(|beatmap| beatmap.hidden).unwrap()
//! });
//! assert!(handle.join().unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod dir;
mod entity;
mod error;
mod live;
mod managed;
mod notify;
mod store;
mod types;

pub use config::Config;
pub use context::{Context, ContextFactory, Query, WriteScope};
pub use entity::{Entity, EntityId, EntityKey, Link};
pub use error::{CoreError, CoreResult};
pub use live::{IntoLive, LiveRef};
pub use managed::Managed;
pub use notify::{ChangeSet, SubscriptionToken};
pub use store::{CommitRecord, WriteOp, FRAME_MAGIC};
pub use types::{ContextId, SequenceNumber};
