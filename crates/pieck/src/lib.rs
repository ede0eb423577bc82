//! # Pieck
//!
//! Async bridge that carries SQL commands to a blocking SQLite connection
//! owned by a dedicated worker thread.
//!
//! ## Non-negotiable Principles
//!
//! - **The driver never blocks the async scheduler** - every blocking call
//!   runs on the connection's own worker thread
//! - **One command in flight per connection** - concurrent callers are
//!   serialized by an exclusivity guard, so commands form a total order
//! - **Cancellation never corrupts the connection** - an abandoned command
//!   still runs to completion, its reply is discarded, and the guard is
//!   released for the next caller
//! - **Shutdown is race-free** - close is idempotent, answers every queued
//!   command, and joins the worker thread
//!
//! ## Architecture
//!
//! ```text
//! async tasks                              worker thread
//! ───────────                              ─────────────
//! execute() ──┐
//! commit()  ──┼─ guard → [dispatch channel] → run loop → rusqlite
//! fetch_*() ──┘                                  │
//!      ∧                                         │
//!      └───────────── oneshot reply ─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use pieck::{Connection, Value};
//!
//! #[tokio::main]
//! async fn main() -> pieck::BridgeResult<()> {
//!     let conn = Connection::open_in_memory().await?;
//!     conn.execute("CREATE TABLE t (x INTEGER)", Vec::new()).await?;
//!     conn.execute("INSERT INTO t VALUES (?1)", vec![Value::Integer(1)])
//!         .await?;
//!
//!     let cursor = conn.query("SELECT x FROM t", Vec::new()).await?;
//!     let rows = cursor.fetch_all().await?;
//!     assert_eq!(rows, vec![vec![Value::Integer(1)]]);
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Crate Structure
//!
//! - [`Connection`] - async connection proxy
//! - [`Cursor`] - async cursor over one result set
//! - [`ExecuteResult`] - row count or cursor, per statement shape
//! - [`OpenOptions`] / [`IsolationLevel`] - connect options
//! - [`BridgeError`] / [`SqlErrorKind`] - classified failures

mod command;
mod config;
mod connection;
mod cursor;
mod error;
mod worker;

#[cfg(test)]
mod tests;

pub use command::{CursorId, Row};
pub use config::{IsolationLevel, OpenOptions};
pub use connection::{Connection, ExecuteResult};
pub use cursor::Cursor;
pub use error::{BridgeError, BridgeResult, SqlErrorKind};

// The driver's value type is part of the public contract: parameters and
// rows cross the bridge in SQLite's own type system.
pub use rusqlite;
pub use rusqlite::types::Value;
