//! # TetherDB Testkit
//!
//! Test utilities for TetherDB.
//!
//! This crate provides:
//! - Fixture entities modelled on a beatmap library
//! - Factory helpers over memory, shared memory and temporary directories
//! - Helpers for running work on a fresh thread
//! - Property-based test generators using proptest
//! - A backend with injectable sync failures
//! - Log capture for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tetherdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_factory() {
//!     with_factory(|factory| {
//!         let context = factory.create_context().unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod threads;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::threads::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use threads::*;
