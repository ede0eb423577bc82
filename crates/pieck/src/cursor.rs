//! Asynchronous cursor proxy.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::command::{unexpected_reply, CursorId, Op, Reply, Row};
use crate::connection::Connection;
use crate::error::{BridgeError, BridgeResult};

/// Rows fetched from the worker per round trip during `fetch_all`.
const FETCH_ALL_BATCH: usize = 256;

/// Async handle to a result set held inside the worker.
///
/// The cursor holds only an opaque handle; the rows live in the worker's
/// table until fetched or released. Every fetch routes through the owning
/// connection's exclusivity guard, so fetches interleave with other
/// operations on the connection in command order, never concurrently.
/// Dropping an unclosed cursor releases its worker-side rows
/// fire-and-forget.
#[derive(Debug)]
pub struct Cursor {
    connection: Connection,
    id: CursorId,
    columns: Vec<String>,
    closed: AtomicBool,
}

impl Cursor {
    pub(crate) fn new(connection: Connection, id: CursorId, columns: Vec<String>) -> Self {
        Self {
            connection,
            id,
            columns,
            closed: AtomicBool::new(false),
        }
    }

    /// Column names of the rows this cursor yields.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Fetches the next row, or `None` once the result set is exhausted.
    ///
    /// Exhaustion is not an error and not a one-time signal: every call
    /// after the last row keeps answering `None` until the cursor closes.
    pub async fn fetch_one(&self) -> BridgeResult<Option<Row>> {
        let rows = self.step(1).await?;
        Ok(rows.into_iter().next())
    }

    /// Fetches up to `n` rows, in result order.
    pub async fn fetch_many(&self, n: usize) -> BridgeResult<Vec<Row>> {
        self.step(n).await
    }

    /// Fetches every remaining row.
    pub async fn fetch_all(&self) -> BridgeResult<Vec<Row>> {
        let mut rows = Vec::new();
        loop {
            let batch = self.step(FETCH_ALL_BATCH).await?;
            let exhausted = batch.len() < FETCH_ALL_BATCH;
            rows.extend(batch);
            if exhausted {
                return Ok(rows);
            }
        }
    }

    /// Closes the cursor, releasing its rows in the worker.
    ///
    /// Idempotent on this handle; fetches after close fail with
    /// `InvalidHandle`.
    pub async fn close(&self) -> BridgeResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self
            .connection
            .roundtrip(Op::CloseCursor { cursor: self.id })
            .await?
        {
            Reply::Ack => Ok(()),
            other => Err(unexpected_reply("close_cursor", &other)),
        }
    }

    async fn step(&self, max_rows: usize) -> BridgeResult<Vec<Row>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::InvalidHandle(self.id));
        }
        match self
            .connection
            .roundtrip(Op::Step {
                cursor: self.id,
                max_rows,
            })
            .await?
        {
            Reply::Rows(rows) => Ok(rows),
            other => Err(unexpected_reply("step", &other)),
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(cursor = %self.id, "cursor dropped without close; releasing its rows");
            self.connection
                .send_detached(Op::CloseCursor { cursor: self.id });
        }
    }
}
