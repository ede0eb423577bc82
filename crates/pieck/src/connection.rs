//! Asynchronous connection proxy.
//!
//! [`Connection`] is the caller-facing handle: cloneable, cheap to share,
//! and safe to use from many tasks at once. Every operation acquires the
//! connection's exclusivity guard, sends one command to the worker thread,
//! and suspends until the reply arrives, so commands execute in a total
//! order per connection. The guard is a scope-bound lock: dropping a
//! caller's future mid-await releases it, while the command it sent runs to
//! completion on the worker and its reply is discarded.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread;

use rusqlite::types::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::{unexpected_reply, Command, CommandReply, Op, Reply};
use crate::config::OpenOptions;
use crate::cursor::Cursor;
use crate::error::{BridgeError, BridgeResult, SqlErrorKind};
use crate::worker;

/// Name of the worker thread serving a connection.
const WORKER_THREAD_NAME: &str = "pieck-sqlite";

/// Outcome of [`Connection::execute`]: writes report how many rows they
/// touched, row-producing statements hand back a cursor.
#[derive(Debug)]
pub enum ExecuteResult {
    /// Rows affected by a write statement
    RowCount(usize),
    /// Cursor over the rows the statement produced
    Cursor(Cursor),
}

impl ExecuteResult {
    /// The affected-row count, if this was a write statement.
    pub fn row_count(&self) -> Option<usize> {
        match self {
            ExecuteResult::RowCount(n) => Some(*n),
            ExecuteResult::Cursor(_) => None,
        }
    }

    /// The cursor, if the statement produced rows.
    pub fn into_cursor(self) -> Option<Cursor> {
        match self {
            ExecuteResult::RowCount(_) => None,
            ExecuteResult::Cursor(cursor) => Some(cursor),
        }
    }
}

struct Inner {
    tx: UnboundedSender<Command>,
    /// Exclusivity guard: held from command send to reply receipt.
    guard: Mutex<()>,
    /// Set under the guard by the first `close`; later calls return early.
    closed: AtomicBool,
    /// Join handle for the worker thread, taken by whoever joins it.
    worker: StdMutex<Option<thread::JoinHandle<()>>>,
    path: PathBuf,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("path", &self.path)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Async handle to one database connection.
///
/// All operations cross a channel to a dedicated worker thread that owns the
/// blocking driver connection, so the async scheduler never blocks on disk.
/// Clones share the same underlying connection and are serialized against
/// each other. Dropping every clone without calling [`Connection::close`]
/// shuts the worker down best-effort.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Opens a database file with default options.
    pub async fn open(path: impl AsRef<Path>) -> BridgeResult<Self> {
        Self::open_with(path, OpenOptions::default()).await
    }

    /// Opens a fresh in-memory database.
    pub async fn open_in_memory() -> BridgeResult<Self> {
        Self::open_with(":memory:", OpenOptions::default()).await
    }

    /// Opens a database, spawning the worker thread that will own it.
    ///
    /// The worker opens the driver connection before this returns; if the
    /// open fails, the worker is torn down and joined, and no handle
    /// escapes.
    pub async fn open_with(path: impl AsRef<Path>, options: OpenOptions) -> BridgeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker::run(rx))
            .map_err(|err| {
                BridgeError::Transport(format!("failed to spawn worker thread: {err}"))
            })?;

        let connection = Connection {
            inner: Arc::new(Inner {
                tx,
                guard: Mutex::new(()),
                closed: AtomicBool::new(false),
                worker: StdMutex::new(Some(handle)),
                path: path.clone(),
            }),
        };

        info!(path = %path.display(), "Opening database");
        match connection.roundtrip(Op::Open { path, options }).await {
            Ok(Reply::Ack) => Ok(connection),
            Ok(other) => {
                connection.abandon().await;
                Err(unexpected_reply("open", &other))
            }
            Err(err) => {
                connection.abandon().await;
                Err(err)
            }
        }
    }

    /// Runs one SQL statement.
    ///
    /// Statements that produce columns come back as an
    /// [`ExecuteResult::Cursor`]; everything else reports its affected-row
    /// count.
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> BridgeResult<ExecuteResult> {
        let reply = self
            .roundtrip(Op::Execute {
                sql: sql.to_string(),
                params,
            })
            .await?;
        match reply {
            Reply::RowCount(n) => Ok(ExecuteResult::RowCount(n)),
            Reply::Cursor { id, columns } => {
                Ok(ExecuteResult::Cursor(Cursor::new(self.clone(), id, columns)))
            }
            other => Err(unexpected_reply("execute", &other)),
        }
    }

    /// Runs a statement expected to produce rows and returns its cursor.
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> BridgeResult<Cursor> {
        match self.execute(sql, params).await? {
            ExecuteResult::Cursor(cursor) => Ok(cursor),
            ExecuteResult::RowCount(_) => Err(BridgeError::Sql {
                kind: SqlErrorKind::Other,
                message: format!("statement produced no result set: {sql}"),
                code: None,
            }),
        }
    }

    /// Runs one statement once per parameter batch, returning the summed
    /// affected-row count.
    pub async fn execute_many(
        &self,
        sql: &str,
        batches: Vec<Vec<Value>>,
    ) -> BridgeResult<usize> {
        let reply = self
            .roundtrip(Op::ExecuteMany {
                sql: sql.to_string(),
                batches,
            })
            .await?;
        match reply {
            Reply::RowCount(n) => Ok(n),
            other => Err(unexpected_reply("execute_many", &other)),
        }
    }

    /// Runs a multi-statement SQL script as written.
    ///
    /// A transaction left open by earlier statements is committed before
    /// the script runs. Transactions inside the script are honored; the
    /// bridge does not wrap the script in one of its own.
    pub async fn execute_script(&self, sql: &str) -> BridgeResult<()> {
        let reply = self
            .roundtrip(Op::ExecuteScript {
                sql: sql.to_string(),
            })
            .await?;
        match reply {
            Reply::Ack => Ok(()),
            other => Err(unexpected_reply("execute_script", &other)),
        }
    }

    /// Commits the open transaction; a no-op when none is open.
    pub async fn commit(&self) -> BridgeResult<()> {
        match self.roundtrip(Op::Commit).await? {
            Reply::Ack => Ok(()),
            other => Err(unexpected_reply("commit", &other)),
        }
    }

    /// Rolls back the open transaction; a no-op when none is open.
    pub async fn rollback(&self) -> BridgeResult<()> {
        match self.roundtrip(Op::Rollback).await? {
            Reply::Ack => Ok(()),
            other => Err(unexpected_reply("rollback", &other)),
        }
    }

    /// Runs `statements` as one transaction.
    ///
    /// Holds the exclusivity guard for the whole sequence: `BEGIN
    /// IMMEDIATE`, every statement in order, then commit. On any failure the
    /// transaction is rolled back and the first error returned. Requires no
    /// transaction to be open already. Cancelling this future mid-sequence
    /// leaves the transaction open on the worker; the next
    /// `commit`/`rollback` settles it.
    pub async fn execute_transaction(
        &self,
        statements: Vec<(String, Vec<Value>)>,
    ) -> BridgeResult<Vec<usize>> {
        let _guard = self.inner.guard.lock().await;
        self.command(Op::Execute {
            sql: "BEGIN IMMEDIATE".to_string(),
            params: Vec::new(),
        })
        .await?;

        let run = match self.transaction_statements(statements).await {
            Ok(counts) => self.command(Op::Commit).await.map(|_| counts),
            Err(err) => Err(err),
        };
        match run {
            Ok(counts) => Ok(counts),
            Err(err) => {
                if let Err(rollback_err) = self.command(Op::Rollback).await {
                    warn!(error = %rollback_err, "rollback of failed transaction also failed");
                }
                Err(err)
            }
        }
    }

    async fn transaction_statements(
        &self,
        statements: Vec<(String, Vec<Value>)>,
    ) -> BridgeResult<Vec<usize>> {
        let mut counts = Vec::with_capacity(statements.len());
        for (sql, params) in statements {
            match self.command(Op::Execute { sql, params }).await? {
                Reply::RowCount(n) => counts.push(n),
                Reply::Cursor { id, .. } => {
                    // Row-producing statements run, but their rows are not
                    // kept past the transaction.
                    self.command(Op::CloseCursor { cursor: id }).await?;
                    counts.push(0);
                }
                other => return Err(unexpected_reply("execute", &other)),
            }
        }
        Ok(counts)
    }

    /// Closes the connection and joins its worker thread.
    ///
    /// Idempotent: the first call delivers the close and reports any close
    /// failure; every later call returns `Ok(())` without reaching the
    /// worker. Safe to call from cleanup paths after earlier operations
    /// failed.
    pub async fn close(&self) -> BridgeResult<()> {
        let _guard = self.inner.guard.lock().await;
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Swap and send happen with no await between them: once the flag is
        // set, the close command is already on the channel, even if this
        // future is dropped before the reply arrives.
        let outcome = match self.send(Op::CloseConnection) {
            Ok((id, rx)) => Self::recv(id, rx).await,
            Err(err) => Err(err),
        };
        self.join_worker().await;
        outcome.map(|_| {
            info!(path = %self.inner.path.display(), "Database closed");
        })
    }

    /// Whether `close` has been called (or the open handshake failed).
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Acquires the exclusivity guard and runs one command under it.
    ///
    /// The `MutexGuard` lives for this future's scope, so the guard is
    /// released on every exit path, including cancellation mid-await.
    pub(crate) async fn roundtrip(&self, op: Op) -> BridgeResult<Reply> {
        let _guard = self.inner.guard.lock().await;
        self.command(op).await
    }

    /// One send/await cycle; the caller must hold the guard.
    async fn command(&self, op: Op) -> BridgeResult<Reply> {
        if self.is_closed() {
            return Err(BridgeError::ConnectionClosed);
        }
        let (id, rx) = self.send(op)?;
        Self::recv(id, rx).await
    }

    /// Sends `op`, returning the receiver its reply will arrive on.
    ///
    /// Synchronous, so callers can couple state changes to the send without
    /// an await point in between.
    fn send(&self, op: Op) -> BridgeResult<(Uuid, oneshot::Receiver<CommandReply>)> {
        let (command, rx) = Command::new(op);
        let id = command.id;
        debug!(command_id = %id, command = command.op.name(), "dispatching command");
        self.inner.tx.send(command).map_err(|_| {
            if self.is_closed() {
                BridgeError::ConnectionClosed
            } else {
                BridgeError::Transport("worker loop is gone".to_string())
            }
        })?;
        Ok((id, rx))
    }

    /// Awaits the reply to `id` and verifies its correlation tag.
    async fn recv(id: Uuid, rx: oneshot::Receiver<CommandReply>) -> BridgeResult<Reply> {
        let reply = rx.await.map_err(|_| {
            BridgeError::Transport("worker dropped the reply channel".to_string())
        })?;
        if reply.id != id {
            return Err(BridgeError::Transport(format!(
                "correlation mismatch: sent {id}, received {}",
                reply.id
            )));
        }
        reply.outcome
    }

    /// Fire-and-forget send used by cursor drops; the reply is discarded.
    pub(crate) fn send_detached(&self, op: Op) {
        if self.is_closed() {
            return;
        }
        let (command, _rx) = Command::new(op);
        let _ = self.inner.tx.send(command);
    }

    /// Tears down a connection whose open handshake failed. The worker has
    /// already exited on its own; only the thread needs joining.
    async fn abandon(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.join_worker().await;
    }

    async fn join_worker(&self) {
        let handle = self
            .inner
            .worker
            .lock()
            .expect("worker handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => warn!("worker thread panicked"),
                Err(err) => warn!(error = %err, "joining worker thread failed"),
            }
        }
    }
}
