//! Test fixtures and factory helpers.
//!
//! The fixture entities mirror a small beatmap library: a beatmap links to
//! the ruleset it is played in and carries its difficulty settings inline.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tempfile::TempDir;
use tetherdb_core::{Config, ContextFactory, Entity, Link};
use tetherdb_storage::InMemoryBackend;

/// A ruleset a beatmap can be played in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruleset {
    /// Stable short name, e.g. `osu`.
    pub short_name: String,
    /// Whether the ruleset can be selected.
    pub available: bool,
}

impl Entity for Ruleset {
    const KIND: &'static str = "ruleset";
}

/// Difficulty settings of a beatmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Difficulty {
    /// Drain rate.
    pub drain_rate: f32,
    /// Circle size.
    pub circle_size: f32,
    /// Overall difficulty.
    pub overall_difficulty: f32,
    /// Approach rate.
    pub approach_rate: f32,
}

impl Default for Difficulty {
    fn default() -> Self {
        Self {
            drain_rate: 5.0,
            circle_size: 5.0,
            overall_difficulty: 5.0,
            approach_rate: 5.0,
        }
    }
}

impl Entity for Difficulty {
    const KIND: &'static str = "difficulty";
}

/// A playable beatmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beatmap {
    /// Ruleset the beatmap is played in.
    pub ruleset: Link<Ruleset>,
    /// Display title.
    pub title: String,
    /// Difficulty settings.
    pub difficulty: Difficulty,
    /// Hidden from song select.
    pub hidden: bool,
}

impl Entity for Beatmap {
    const KIND: &'static str = "beatmap";
}

impl Beatmap {
    /// Creates a visible beatmap with default difficulty.
    pub fn new(ruleset: Link<Ruleset>, title: impl Into<String>) -> Self {
        Self {
            ruleset,
            title: title.into(),
            difficulty: Difficulty::default(),
            hidden: false,
        }
    }
}

/// Creates an available ruleset.
pub fn ruleset(short_name: &str) -> Ruleset {
    Ruleset {
        short_name: short_name.to_owned(),
        available: true,
    }
}

/// A factory over a database that goes away with the value.
pub struct TestFactory {
    /// The factory.
    pub factory: ContextFactory,
    backend: Option<InMemoryBackend>,
    temp_dir: Option<TempDir>,
}

impl TestFactory {
    /// Opens a factory over a fresh in-memory database.
    pub fn memory() -> Self {
        Self {
            factory: ContextFactory::open_in_memory().expect("Failed to open in-memory factory"),
            backend: None,
            temp_dir: None,
        }
    }

    /// Opens a factory over an in-memory log that [`TestFactory::reopen`]
    /// can replay.
    pub fn shared_memory() -> Self {
        let backend = InMemoryBackend::new();
        let factory = ContextFactory::open_with_backend(Config::default(), Box::new(backend.clone()))
            .expect("Failed to open shared-memory factory");
        Self {
            factory,
            backend: Some(backend),
            temp_dir: None,
        }
    }

    /// Opens a factory over a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let factory = ContextFactory::open(temp_dir.path()).expect("Failed to open file factory");
        Self {
            factory,
            backend: None,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database directory if file-based.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Shuts the factory down and opens a new one over the same data.
    ///
    /// # Panics
    ///
    /// Panics for a plain in-memory factory, which has nothing to replay.
    pub fn reopen(self) -> Self {
        let Self {
            factory,
            backend,
            temp_dir,
        } = self;
        factory.shutdown();
        drop(factory);

        let factory = match (&backend, &temp_dir) {
            (Some(backend), _) => {
                ContextFactory::open_with_backend(Config::default(), Box::new(backend.clone()))
            }
            (None, Some(dir)) => ContextFactory::open(dir.path()),
            (None, None) => panic!("an in-memory factory cannot be reopened"),
        }
        .expect("Failed to reopen factory");

        Self {
            factory,
            backend,
            temp_dir,
        }
    }
}

impl std::ops::Deref for TestFactory {
    type Target = ContextFactory;

    fn deref(&self) -> &Self::Target {
        &self.factory
    }
}

/// Runs a test with a fresh in-memory factory.
///
/// # Example
///
/// ```rust,ignore
/// use tetherdb_testkit::with_factory;
///
/// #[test]
/// fn my_test() {
///     with_factory(|factory| {
///         let context = factory.create_context().unwrap();
///         assert!(context.is_open());
///     });
/// }
/// ```
pub fn with_factory<F, R>(f: F) -> R
where
    F: FnOnce(&ContextFactory) -> R,
{
    let test = TestFactory::memory();
    f(&test.factory)
}

/// Runs a test with a factory over a temporary directory.
pub fn with_file_factory<F, R>(f: F) -> R
where
    F: FnOnce(&ContextFactory, &Path) -> R,
{
    let test = TestFactory::file();
    let path = test.path().expect("file factory has a path").to_path_buf();
    f(&test.factory, &path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tetherdb_core::IntoLive;

    #[test]
    fn memory_factory_opens() {
        with_factory(|factory| {
            let context = factory.create_context().unwrap();
            assert!(context.is_open());
        });
    }

    #[test]
    fn file_factory_has_path() {
        with_file_factory(|factory, path| {
            assert!(path.is_dir());
            assert!(!factory.is_shut_down());
        });
    }

    #[test]
    fn reopen_keeps_rows() {
        for test in [TestFactory::shared_memory(), TestFactory::file()] {
            let live = {
                let context = test.create_context().unwrap();
                context
                    .write(|scope| scope.add(ruleset("osu")))
                    .unwrap()
                    .to_live()
            };

            let test = test.reopen();
            let context = test.create_context().unwrap();
            let key = live.key().unwrap();
            let reopened = context.resolve::<Ruleset>(key).unwrap();
            assert_eq!(reopened.get().unwrap(), ruleset("osu"));
        }
    }
}
