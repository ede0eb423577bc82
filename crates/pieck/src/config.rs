//! Connection options.

use std::time::Duration;

use rusqlite::OpenFlags;

/// Transaction discipline for a connection.
///
/// Anything other than `Autocommit` makes the worker open a transaction of
/// the given kind before a row-modifying statement (INSERT, UPDATE, DELETE,
/// REPLACE) that would otherwise run outside one, so `commit`/`rollback`
/// have something to act on. DDL and explicit transaction control always
/// run as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Never open implicit transactions; every statement commits on its own
    Autocommit,
    /// `BEGIN DEFERRED` before row-modifying statements
    Deferred,
    /// `BEGIN IMMEDIATE` before row-modifying statements
    Immediate,
    /// `BEGIN EXCLUSIVE` before row-modifying statements
    Exclusive,
}

impl IsolationLevel {
    /// The statement that opens a transaction at this level, if any.
    pub(crate) fn begin_statement(self) -> Option<&'static str> {
        match self {
            IsolationLevel::Autocommit => None,
            IsolationLevel::Deferred => Some("BEGIN DEFERRED"),
            IsolationLevel::Immediate => Some("BEGIN IMMEDIATE"),
            IsolationLevel::Exclusive => Some("BEGIN EXCLUSIVE"),
        }
    }
}

/// Options for opening a database.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Open the file read-only; write statements fail at the driver
    pub read_only: bool,

    /// Create the database file if it does not exist
    pub create_if_missing: bool,

    /// Interpret the path as a `file:` URI
    pub uri: bool,

    /// How long the driver waits on a locked database before reporting
    /// busy; `None` reports busy immediately
    pub busy_timeout: Option<Duration>,

    /// Transaction discipline for implicit transactions
    pub isolation_level: IsolationLevel,
}

impl OpenOptions {
    /// Driver open flags for these options.
    pub(crate) fn open_flags(&self) -> OpenFlags {
        let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.read_only {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
            if self.create_if_missing {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
        }
        if self.uri {
            flags |= OpenFlags::SQLITE_OPEN_URI;
        }
        flags
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            create_if_missing: true,
            uri: false,
            busy_timeout: None,
            isolation_level: IsolationLevel::Deferred,
        }
    }
}
