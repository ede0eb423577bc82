//! Worker loop that owns the blocking driver connection.
//!
//! One worker thread serves one connection. The loop:
//! 1. Opens the database (the first command on a fresh channel must be `Open`)
//! 2. Executes every following command synchronously, in arrival order, and
//!    answers each with exactly one reply
//! 3. On `CloseConnection`, releases every cursor, closes the driver
//!    connection, answers queued stragglers with `ConnectionClosed`, and
//!    terminates
//!
//! A failed command never terminates the loop; the failure travels back to
//! the caller that issued it. The driver connection and all result sets live
//! only on this thread, so no locking happens here. If the dispatch channel
//! closes without an explicit `CloseConnection` (every proxy was dropped),
//! the loop closes the database best-effort and exits.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::command::{Command, CommandReply, CursorId, Op, Reply, Row};
use crate::config::{IsolationLevel, OpenOptions};
use crate::error::{BridgeError, BridgeResult};

/// Materialized result set backing one cursor handle.
///
/// Driver statements borrow the connection, so rows are pulled in full when
/// the statement runs; `Step` commands then drain them in result order.
#[derive(Debug)]
struct ResultSet {
    columns: Vec<String>,
    rows: VecDeque<Row>,
}

/// Worker-side connection state: the driver connection plus the table of
/// live result sets, keyed by the handles the proxies hold.
#[derive(Debug)]
struct Worker {
    /// `None` once the connection has been closed.
    conn: Option<rusqlite::Connection>,
    cursors: HashMap<CursorId, ResultSet>,
    next_cursor_id: u64,
    isolation: IsolationLevel,
}

/// Runs the worker loop until close or channel shutdown.
///
/// Consumes commands from `rx` in FIFO order and answers each on its own
/// reply channel. Replies to callers that have gone away are discarded.
pub(crate) fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    // Open phase: the proxy sends Open before anything else.
    let Some(Command { id, op, reply }) = rx.blocking_recv() else {
        return;
    };
    let (path, options) = match op {
        Op::Open { path, options } => (path, options),
        other => {
            let _ = reply.send(CommandReply {
                id,
                outcome: Err(BridgeError::Transport(format!(
                    "first command must be open, got {}",
                    other.name()
                ))),
            });
            return;
        }
    };
    let mut worker = match Worker::open(&path, options) {
        Ok(worker) => worker,
        Err(err) => {
            let _ = reply.send(CommandReply {
                id,
                outcome: Err(err),
            });
            return;
        }
    };
    debug!(path = %path.display(), "worker opened database");
    let _ = reply.send(CommandReply {
        id,
        outcome: Ok(Reply::Ack),
    });

    // Serve loop: one command, one reply, in arrival order.
    while let Some(Command { id, op, reply }) = rx.blocking_recv() {
        let name = op.name();
        let outcome = match op {
            Op::Open { .. } => Err(BridgeError::Transport(
                "connection is already open".to_string(),
            )),
            Op::Execute { sql, params } => worker.execute(&sql, params),
            Op::ExecuteMany { sql, batches } => worker.execute_many(&sql, batches),
            Op::ExecuteScript { sql } => worker.execute_script(&sql),
            Op::Step { cursor, max_rows } => worker.step(cursor, max_rows),
            Op::Commit => worker.commit(),
            Op::Rollback => worker.rollback(),
            Op::CloseCursor { cursor } => worker.close_cursor(cursor),
            Op::CloseConnection => {
                let outcome = worker.close();
                if reply.send(CommandReply { id, outcome }).is_err() {
                    debug!(command_id = %id, "close caller went away; reply discarded");
                }
                drain_closed(&mut rx);
                return;
            }
        };
        if reply.send(CommandReply { id, outcome }).is_err() {
            debug!(command_id = %id, command = name, "caller went away; reply discarded");
        }
    }

    // Every sender dropped without an explicit close.
    debug!("dispatch channel closed without close; shutting down worker");
    if let Err(err) = worker.close() {
        warn!(error = %err, "closing abandoned database connection failed");
    }
}

/// Answers commands already queued behind a close with `ConnectionClosed`.
fn drain_closed(rx: &mut mpsc::UnboundedReceiver<Command>) {
    while let Ok(Command { id, reply, .. }) = rx.try_recv() {
        let _ = reply.send(CommandReply {
            id,
            outcome: Err(BridgeError::ConnectionClosed),
        });
    }
}

impl Worker {
    fn open(path: &Path, options: OpenOptions) -> BridgeResult<Self> {
        let conn = rusqlite::Connection::open_with_flags(path, options.open_flags())
            .map_err(BridgeError::open_failure)?;
        if let Some(timeout) = options.busy_timeout {
            conn.busy_timeout(timeout).map_err(BridgeError::open_failure)?;
        }
        Ok(Self {
            conn: Some(conn),
            cursors: HashMap::new(),
            next_cursor_id: 0,
            isolation: options.isolation_level,
        })
    }

    /// The live connection, or `ConnectionClosed` once it is gone.
    fn conn(&self) -> BridgeResult<&rusqlite::Connection> {
        self.conn.as_ref().ok_or(BridgeError::ConnectionClosed)
    }

    /// Opens a transaction per the configured isolation level when a
    /// row-modifying statement is about to run outside one.
    fn begin_if_needed(&self) -> BridgeResult<()> {
        let Some(begin) = self.isolation.begin_statement() else {
            return Ok(());
        };
        let conn = self.conn()?;
        if conn.is_autocommit() {
            conn.execute_batch(begin).map_err(BridgeError::from_driver)?;
        }
        Ok(())
    }

    /// Runs one statement: writes answer with their row count, statements
    /// that produce columns answer with a fresh cursor handle.
    fn execute(&mut self, sql: &str, params: Vec<Value>) -> BridgeResult<Reply> {
        if is_dml(sql) {
            self.begin_if_needed()?;
        }
        let set = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(sql).map_err(BridgeError::from_driver)?;
            if stmt.column_count() == 0 {
                let changed = stmt
                    .execute(params_from_iter(params))
                    .map_err(BridgeError::from_driver)?;
                return Ok(Reply::RowCount(changed));
            }
            materialize(&mut stmt, params)?
        };
        Ok(self.register_cursor(set))
    }

    /// Runs one statement once per parameter batch, summing the row counts.
    fn execute_many(&self, sql: &str, batches: Vec<Vec<Value>>) -> BridgeResult<Reply> {
        if is_dml(sql) {
            self.begin_if_needed()?;
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(BridgeError::from_driver)?;
        let mut total = 0;
        for batch in batches {
            total += stmt
                .execute(params_from_iter(batch))
                .map_err(BridgeError::from_driver)?;
        }
        Ok(Reply::RowCount(total))
    }

    /// Runs a multi-statement script. A transaction left open by earlier
    /// commands is committed first, matching the blocking driver's script
    /// execution; transactions inside the script itself run as written.
    fn execute_script(&self, sql: &str) -> BridgeResult<Reply> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")
                .map_err(BridgeError::from_driver)?;
        }
        conn.execute_batch(sql).map_err(BridgeError::from_driver)?;
        Ok(Reply::Ack)
    }

    /// Takes up to `max_rows` rows from a cursor. An exhausted cursor keeps
    /// answering with empty row sets until it is closed.
    fn step(&mut self, cursor: CursorId, max_rows: usize) -> BridgeResult<Reply> {
        let set = self
            .cursors
            .get_mut(&cursor)
            .ok_or(BridgeError::InvalidHandle(cursor))?;
        let take = max_rows.min(set.rows.len());
        Ok(Reply::Rows(set.rows.drain(..take).collect()))
    }

    /// Commits the open transaction; nothing pending answers with a plain
    /// ack, like the drivers this bridge fronts.
    fn commit(&self) -> BridgeResult<Reply> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")
                .map_err(BridgeError::from_driver)?;
        }
        Ok(Reply::Ack)
    }

    /// Rolls back the open transaction; a no-op ack when none is open.
    fn rollback(&self) -> BridgeResult<Reply> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")
                .map_err(BridgeError::from_driver)?;
        }
        Ok(Reply::Ack)
    }

    fn close_cursor(&mut self, cursor: CursorId) -> BridgeResult<Reply> {
        self.cursors
            .remove(&cursor)
            .map(|_| Reply::Ack)
            .ok_or(BridgeError::InvalidHandle(cursor))
    }

    /// Releases every cursor and closes the driver connection. Idempotent on
    /// the worker side; a close failure is reported once and the connection
    /// is dropped regardless.
    fn close(&mut self) -> BridgeResult<Reply> {
        self.cursors.clear();
        match self.conn.take() {
            Some(conn) => conn
                .close()
                .map(|_| Reply::Ack)
                .map_err(|(_conn, err)| BridgeError::from_driver(err)),
            None => Ok(Reply::Ack),
        }
    }

    fn register_cursor(&mut self, set: ResultSet) -> Reply {
        self.next_cursor_id += 1;
        let id = CursorId(self.next_cursor_id);
        let columns = set.columns.clone();
        self.cursors.insert(id, set);
        Reply::Cursor { id, columns }
    }
}

/// True when a statement's leading keyword marks it as row-modifying.
///
/// Only INSERT, UPDATE, DELETE, and REPLACE open implicit transactions.
/// Everything else, including DDL, VACUUM, and explicit transaction
/// control, runs exactly as written.
fn is_dml(sql: &str) -> bool {
    const KEYWORDS: [&[u8]; 4] = [b"INSERT", b"UPDATE", b"DELETE", b"REPLACE"];
    let body = strip_leading_trivia(sql).as_bytes();
    KEYWORDS
        .iter()
        .any(|kw| body.len() >= kw.len() && body[..kw.len()].eq_ignore_ascii_case(kw))
}

/// Skips whitespace and SQL comments at the front of a statement.
fn strip_leading_trivia(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            return sql;
        }
    }
}

/// Pulls every row of a prepared statement into an owned result set.
fn materialize(stmt: &mut rusqlite::Statement<'_>, params: Vec<Value>) -> BridgeResult<ResultSet> {
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let column_count = stmt.column_count();
    let mut rows = stmt
        .query(params_from_iter(params))
        .map_err(BridgeError::from_driver)?;
    let mut out = VecDeque::new();
    while let Some(row) = rows.next().map_err(BridgeError::from_driver)? {
        let mut tuple = Vec::with_capacity(column_count);
        for i in 0..column_count {
            tuple.push(row.get::<_, Value>(i).map_err(BridgeError::from_driver)?);
        }
        out.push_back(tuple);
    }
    Ok(ResultSet { columns, rows: out })
}
