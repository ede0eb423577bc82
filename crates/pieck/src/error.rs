//! Error types for the bridge.

use thiserror::Error;

use crate::command::CursorId;

/// Classified cause of a failed SQL statement.
///
/// The worker derives this from the driver's primary result code so callers
/// can branch on the failure class without parsing message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlErrorKind {
    /// UNIQUE, NOT NULL, CHECK, or FOREIGN KEY constraint violation
    ConstraintViolation,
    /// The statement could not be parsed or references missing schema
    SyntaxError,
    /// Disk-level failure (I/O error, full disk, corrupt or missing file)
    Io,
    /// Any other failure the driver reports
    Other,
}

/// Bridge error type.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The database file or engine could not be opened
    #[error("Cannot open database: {message}")]
    Open {
        message: String,
        /// Native extended result code, when the driver reports one
        code: Option<i32>,
    },

    /// A SQL statement failed
    #[error("SQL error: {message}")]
    Sql {
        kind: SqlErrorKind,
        message: String,
        /// Native extended result code, when the driver reports one
        code: Option<i32>,
    },

    /// Contention with another writer; the call may be retried
    #[error("Database busy or locked: {message}")]
    BusyOrLocked { message: String, code: Option<i32> },

    /// A cursor handle that was already closed or never issued
    #[error("Invalid cursor handle: {0}")]
    InvalidHandle(CursorId),

    /// Operation attempted after the connection was closed
    #[error("Cannot operate on a closed connection")]
    ConnectionClosed,

    /// Channel or worker failure; indicates a bug, not a data condition
    #[error("Transport error: {0}")]
    Transport(String),
}

impl BridgeError {
    /// Classifies a driver error raised while executing a command.
    pub(crate) fn from_driver(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, msg) => {
                let message = msg.unwrap_or_else(|| e.to_string());
                Self::classified(e, message)
            }
            rusqlite::Error::SqlInputError { error, msg, sql, .. } => {
                Self::classified(error, format!("{msg} in \"{sql}\""))
            }
            other => Self::Sql {
                kind: SqlErrorKind::Other,
                message: other.to_string(),
                code: None,
            },
        }
    }

    /// Classifies a driver error raised while opening the database.
    pub(crate) fn open_failure(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, msg) => Self::Open {
                message: msg.unwrap_or_else(|| e.to_string()),
                code: Some(e.extended_code),
            },
            other => Self::Open {
                message: other.to_string(),
                code: None,
            },
        }
    }

    fn classified(e: rusqlite::ffi::Error, message: String) -> Self {
        use rusqlite::ErrorCode;

        let code = Some(e.extended_code);
        match e.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                Self::BusyOrLocked { message, code }
            }
            ErrorCode::ConstraintViolation => Self::Sql {
                kind: SqlErrorKind::ConstraintViolation,
                message,
                code,
            },
            ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::CannotOpen
            | ErrorCode::NotADatabase => Self::Sql {
                kind: SqlErrorKind::Io,
                message,
                code,
            },
            // The generic SQLITE_ERROR code covers parse failures and
            // missing-schema references; the driver exposes it as Unknown.
            ErrorCode::Unknown => Self::Sql {
                kind: SqlErrorKind::SyntaxError,
                message,
                code,
            },
            _ => Self::Sql {
                kind: SqlErrorKind::Other,
                message,
                code,
            },
        }
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
