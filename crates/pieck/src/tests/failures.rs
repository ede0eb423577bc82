//! Failure classification and recovery: bad SQL never takes the worker down.

use std::time::Duration;

use rusqlite::ffi;
use tempfile::tempdir;
use tokio::time::sleep;

use crate::{BridgeError, Connection, OpenOptions, SqlErrorKind, Value};

#[tokio::test]
async fn missing_table_classifies_as_syntax_error() {
    let conn = Connection::open_in_memory().await.unwrap();

    let err = conn
        .query("SELECT * FROM nonexistent", Vec::new())
        .await
        .unwrap_err();
    match err {
        BridgeError::Sql { kind, message, .. } => {
            assert_eq!(kind, SqlErrorKind::SyntaxError);
            assert!(
                message.contains("no such table"),
                "unexpected message: {message}"
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The worker keeps serving after a failed statement.
    conn.execute("CREATE TABLE nonexistent (x INTEGER)", Vec::new())
        .await
        .unwrap();
    let cursor = conn
        .query("SELECT * FROM nonexistent", Vec::new())
        .await
        .unwrap();
    assert!(cursor.fetch_all().await.unwrap().is_empty());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn unique_violation_classifies_as_constraint() {
    let conn = Connection::open_in_memory().await.unwrap();
    conn.execute(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT UNIQUE)",
        Vec::new(),
    )
    .await
    .unwrap();
    conn.execute(
        "INSERT INTO users (email) VALUES (?1)",
        vec![Value::Text("a@example.com".into())],
    )
    .await
    .unwrap();

    let err = conn
        .execute(
            "INSERT INTO users (email) VALUES (?1)",
            vec![Value::Text("a@example.com".into())],
        )
        .await
        .unwrap_err();
    match err {
        BridgeError::Sql { kind, code, .. } => {
            assert_eq!(kind, SqlErrorKind::ConstraintViolation);
            assert_eq!(code, Some(ffi::SQLITE_CONSTRAINT_UNIQUE));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    conn.close().await.unwrap();
}

#[tokio::test]
async fn lock_contention_classifies_as_busy_or_locked() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("contended.db");

    let holder = Connection::open(&path).await.unwrap();
    holder
        .execute("CREATE TABLE t (x INTEGER)", Vec::new())
        .await
        .unwrap();

    let contender = Connection::open(&path).await.unwrap();

    holder
        .execute("BEGIN EXCLUSIVE", Vec::new())
        .await
        .unwrap();
    let err = contender
        .execute("INSERT INTO t VALUES (1)", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::BusyOrLocked { .. }), "got {err:?}");

    // Releasing the lock lets the contender proceed.
    holder.rollback().await.unwrap();
    contender
        .execute("INSERT INTO t VALUES (1)", Vec::new())
        .await
        .unwrap();
    contender.commit().await.unwrap();

    holder.close().await.unwrap();
    contender.close().await.unwrap();
}

#[tokio::test]
async fn busy_timeout_waits_out_short_locks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("busy.db");

    let holder = Connection::open(&path).await.unwrap();
    holder
        .execute("CREATE TABLE t (x INTEGER)", Vec::new())
        .await
        .unwrap();
    holder
        .execute("BEGIN EXCLUSIVE", Vec::new())
        .await
        .unwrap();

    let options = OpenOptions {
        busy_timeout: Some(Duration::from_secs(5)),
        ..OpenOptions::default()
    };
    let patient = Connection::open_with(&path, options).await.unwrap();

    let unlock = {
        let holder = holder.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            holder.rollback().await.unwrap();
        })
    };

    // Waits for the lock to clear instead of failing immediately.
    patient
        .execute("INSERT INTO t VALUES (1)", Vec::new())
        .await
        .unwrap();
    patient.commit().await.unwrap();
    unlock.await.unwrap();

    holder.close().await.unwrap();
    patient.close().await.unwrap();
}

#[tokio::test]
async fn wrong_parameter_count_classifies_as_other() {
    let conn = Connection::open_in_memory().await.unwrap();
    conn.execute("CREATE TABLE t (a INTEGER, b INTEGER)", Vec::new())
        .await
        .unwrap();

    let err = conn
        .execute("INSERT INTO t VALUES (?1, ?2)", vec![Value::Integer(1)])
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            BridgeError::Sql {
                kind: SqlErrorKind::Other,
                ..
            }
        ),
        "got {err:?}"
    );

    conn.close().await.unwrap();
}
