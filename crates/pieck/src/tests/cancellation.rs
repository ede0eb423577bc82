//! Dropped caller futures: dispatched commands still run, their replies are
//! discarded, and the connection stays serviceable for everyone else.

use std::time::Duration;

use tokio::time::timeout;

use crate::{Connection, Value};

use super::{item_count, items_db};

#[tokio::test(start_paused = true)]
async fn cancelled_call_still_executes_on_the_worker() {
    let conn = items_db().await;

    // Zero timeout: the command is dispatched on the first poll, then the
    // caller's future is dropped before the reply can arrive.
    let cancelled = timeout(
        Duration::ZERO,
        conn.execute("INSERT INTO items (name) VALUES ('orphan')", Vec::new()),
    )
    .await;
    assert!(cancelled.is_err());

    // The orphaned insert ran to completion ahead of this count.
    assert_eq!(item_count(&conn).await, 1);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn cancelled_waiter_releases_its_place_in_line() {
    let conn = Connection::open_in_memory().await.unwrap();
    conn.execute("CREATE TABLE t (x INTEGER)", Vec::new())
        .await
        .unwrap();

    // Occupy the worker with a query that takes real time.
    let heavy = {
        let conn = conn.clone();
        tokio::spawn(async move {
            let cursor = conn
                .query(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 2000000) \
                     SELECT count(*) FROM c",
                    Vec::new(),
                )
                .await
                .unwrap();
            cursor.fetch_one().await.unwrap().unwrap()
        })
    };
    // Let the heavy query acquire the connection before contending with it.
    tokio::task::yield_now().await;

    // This caller gives up while still waiting its turn; nothing was
    // dispatched on its behalf.
    let cancelled = timeout(
        Duration::from_millis(10),
        conn.execute("INSERT INTO t VALUES (1)", Vec::new()),
    )
    .await;
    assert!(cancelled.is_err());

    assert_eq!(heavy.await.unwrap(), vec![Value::Integer(2_000_000)]);

    // The abandoned waiter left no trace and no held lock.
    let cursor = conn
        .query("SELECT count(*) FROM t", Vec::new())
        .await
        .unwrap();
    assert_eq!(
        cursor.fetch_one().await.unwrap(),
        Some(vec![Value::Integer(0)])
    );

    conn.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancelled_close_still_closes_the_connection() {
    let conn = Connection::open_in_memory().await.unwrap();

    let cancelled = timeout(Duration::ZERO, conn.close()).await;
    assert!(cancelled.is_err());

    // The close command was dispatched before the caller gave up; the
    // handle reports closed and a second close is a clean no-op.
    assert!(conn.is_closed());
    conn.close().await.unwrap();
}
