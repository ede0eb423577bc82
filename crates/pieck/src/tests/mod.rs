//! Behavior tests for the bridge, organized by concern:
//!
//! - `lifecycle.rs`    - Opening, closing, and worker shutdown
//! - `ordering.rs`     - FIFO execution across concurrent tasks
//! - `cursors.rs`      - Stepping, batch fetches, and handle invalidation
//! - `failures.rs`     - Failure classification and recovery
//! - `transactions.rs` - Commit, rollback, and the transaction helpers
//! - `cancellation.rs` - Dropped caller futures and orphaned replies
//!
//! Everything here drives the public API against a real database, in memory
//! unless the scenario needs a file on disk.

mod cancellation;
mod failures;

use crate::{Connection, Value};

/// Opens an in-memory database with an empty `items` table.
async fn items_db() -> Connection {
    let conn = Connection::open_in_memory().await.unwrap();
    conn.execute(
        "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)",
        Vec::new(),
    )
    .await
    .unwrap();
    conn
}

/// Counts the rows of `items`.
async fn item_count(conn: &Connection) -> i64 {
    let cursor = conn
        .query("SELECT count(*) FROM items", Vec::new())
        .await
        .unwrap();
    let row = cursor
        .fetch_one()
        .await
        .unwrap()
        .expect("count(*) always yields a row");
    match row.as_slice() {
        [Value::Integer(n)] => *n,
        other => panic!("count(*) produced {other:?}"),
    }
}

/// Basic workflow test demonstrating the command set end to end.
#[tokio::test]
async fn basic_workflow() {
    let conn = Connection::open_in_memory().await.unwrap();

    conn.execute("CREATE TABLE t (x INTEGER)", Vec::new())
        .await
        .unwrap();

    let inserted = conn
        .execute("INSERT INTO t VALUES (?1)", vec![Value::Integer(1)])
        .await
        .unwrap();
    assert_eq!(inserted.row_count(), Some(1));

    let cursor = conn.query("SELECT x FROM t", Vec::new()).await.unwrap();
    assert_eq!(cursor.columns(), ["x"]);
    let rows = cursor.fetch_all().await.unwrap();
    assert_eq!(rows, vec![vec![Value::Integer(1)]]);

    conn.commit().await.unwrap();
    conn.close().await.unwrap();
    assert!(conn.is_closed());
}
