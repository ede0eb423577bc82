//! Command protocol between the async proxies and the worker loop.
//!
//! Every request crosses the dispatch channel as a [`Command`]: an immutable
//! operation description plus a correlation id and the oneshot sender the
//! worker answers on. Exactly one [`CommandReply`] comes back per command.

use std::fmt;
use std::path::PathBuf;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::config::OpenOptions;
use crate::error::BridgeResult;

/// One row of query results, in the driver's own value type.
pub type Row = Vec<rusqlite::types::Value>;

/// Opaque handle to a result set held inside the worker.
///
/// Minted by the worker when a statement produces rows; only valid against
/// the connection that issued it, and only until the cursor or the
/// connection is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(pub(crate) u64);

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The operation a command asks the worker to perform.
#[derive(Debug)]
pub(crate) enum Op {
    /// Open the database; must be the first command on a fresh channel.
    Open {
        path: PathBuf,
        options: OpenOptions,
    },
    /// Run one statement; replies `RowCount` for writes, `Cursor` for reads.
    Execute {
        sql: String,
        params: Vec<rusqlite::types::Value>,
    },
    /// Run one statement once per parameter batch; replies the summed count.
    ExecuteMany {
        sql: String,
        batches: Vec<Vec<rusqlite::types::Value>>,
    },
    /// Run a multi-statement script through the driver's batch API.
    ExecuteScript { sql: String },
    /// Take up to `max_rows` rows from a cursor, in result order.
    Step { cursor: CursorId, max_rows: usize },
    /// Commit the open transaction, if any.
    Commit,
    /// Roll back the open transaction, if any.
    Rollback,
    /// Release a cursor's result set.
    CloseCursor { cursor: CursorId },
    /// Close the database and terminate the worker loop.
    CloseConnection,
}

impl Op {
    /// Stable label for logging.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Op::Open { .. } => "open",
            Op::Execute { .. } => "execute",
            Op::ExecuteMany { .. } => "execute_many",
            Op::ExecuteScript { .. } => "execute_script",
            Op::Step { .. } => "step",
            Op::Commit => "commit",
            Op::Rollback => "rollback",
            Op::CloseCursor { .. } => "close_cursor",
            Op::CloseConnection => "close_connection",
        }
    }
}

/// Successful outcome of a command.
#[derive(Debug)]
pub(crate) enum Reply {
    /// Rows drained by a `Step`; empty when the cursor is exhausted.
    Rows(Vec<Row>),
    /// Rows affected by a write statement.
    RowCount(usize),
    /// Handle to a fresh result set, with the statement's column names.
    Cursor {
        id: CursorId,
        columns: Vec<String>,
    },
    /// Completed with nothing to report.
    Ack,
}

/// A command's outcome, tagged with its correlation id.
#[derive(Debug)]
pub(crate) struct CommandReply {
    pub id: Uuid,
    pub outcome: BridgeResult<Reply>,
}

/// One request in flight from a proxy to the worker.
#[derive(Debug)]
pub(crate) struct Command {
    /// Correlation id, assigned when the command is built.
    pub id: Uuid,
    pub op: Op,
    /// Where the worker sends the single reply.
    pub reply: oneshot::Sender<CommandReply>,
}

impl Command {
    /// Builds a command around `op`, returning the receiver its reply will
    /// arrive on.
    pub(crate) fn new(op: Op) -> (Self, oneshot::Receiver<CommandReply>) {
        let (reply, rx) = oneshot::channel();
        let command = Command {
            id: Uuid::new_v4(),
            op,
            reply,
        };
        (command, rx)
    }
}

/// Error for a reply variant the operation can never produce. Reaching this
/// means the worker broke the command protocol.
pub(crate) fn unexpected_reply(op: &str, reply: &Reply) -> crate::error::BridgeError {
    crate::error::BridgeError::Transport(format!("unexpected reply to {op}: {reply:?}"))
}
