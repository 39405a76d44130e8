//! Factory configuration.

/// Configuration for opening a [`crate::ContextFactory`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the commit log on every commit (safer but slower).
    /// When false the log is only flushed to the OS.
    pub sync_on_commit: bool,

    /// Whether to drop row versions no open context can see after each
    /// commit and context close.
    pub vacuum_on_commit: bool,

    /// Commit log format version for new databases.
    pub format_version: (u16, u16),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            vacuum_on_commit: true,
            format_version: (1, 0),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the commit log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether unreachable row versions are vacuumed.
    #[must_use]
    pub const fn vacuum_on_commit(mut self, value: bool) -> Self {
        self.vacuum_on_commit = value;
        self
    }
}
