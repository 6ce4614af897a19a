//! Configuration for the connection pool backing a [`Store`](crate::Store).

use std::time::Duration;

/// Configuration for opening a [`Store`](crate::Store).
///
/// There is no file-format or CLI parsing here — that belongs to the
/// embedding application — but without some ambient configuration surface
/// the crate could only ever be tested against one pool shape.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Where to open the SQLite database. `"sqlite::memory:"` for tests and
    /// ephemeral use, a file path for durable storage.
    pub database_url: String,

    /// Maximum number of pooled connections.
    pub max_connections: u32,

    /// How long a connection waits on a locked database before giving up.
    pub busy_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_owned(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl RunnerConfig {
    /// A config pointed at an in-memory database, the shape integration
    /// tests use.
    ///
    /// Pinned to a single pooled connection: SQLite hands each new
    /// connection to `:memory:` a fresh, independent database, so a pool
    /// of more than one connection would silently scatter a room's events
    /// across unrelated databases.
    pub fn in_memory() -> Self {
        Self { max_connections: 1, ..Self::default() }
    }

    /// A config pointed at a database file on disk.
    pub fn file(path: impl Into<String>) -> Self {
        Self { database_url: path.into(), ..Self::default() }
    }
}
