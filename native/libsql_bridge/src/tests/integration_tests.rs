//! Integration tests with a real SQLite database
//!
//! These tests drive the bridge end to end against temporary local databases:
//! transactions and savepoints, prepared statements, cursors, batches and
//! the connection lifecycle. Bridge calls are synchronous, so these are
//! plain `#[test]` functions.

#![allow(clippy::unwrap_used)]

use std::thread;
use std::time::Duration;

use super::test_utils::{open_local, setup_test_db_with_prefix, test_bridge, TestDbGuard};
use crate::constants::MAX_ORPHANED_HANDLES;
use crate::error::{BridgeError, SqlErrorKind};
use crate::{ConnectConfig, CursorState, Mode, TransactionBehavior, Value};

fn ints(result: &crate::ResultSet) -> Vec<i64> {
    result
        .rows
        .iter()
        .map(|row| match row[0] {
            Value::Integer(v) => v,
            ref other => panic!("expected integer, got {other:?}"),
        })
        .collect()
}

#[test]
fn test_connect_and_query_local_database() {
    let (_guard, bridge, conn) = open_local("connect");

    assert!(bridge.ping(conn).unwrap());
    assert_eq!(bridge.connection_mode(conn).unwrap(), Mode::Local);

    bridge
        .execute(conn, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", vec![])
        .unwrap();
    let affected = bridge
        .execute(
            conn,
            "INSERT INTO users (name) VALUES (?1), (?2)",
            vec!["Alice".into(), "Bob".into()],
        )
        .unwrap();
    assert_eq!(affected, 2);

    let result = bridge
        .query(conn, "SELECT id, name FROM users ORDER BY id", vec![])
        .unwrap();
    assert_eq!(result.columns, vec!["id", "name"]);
    assert_eq!(result.num_rows, 2);
    assert_eq!(
        result.rows[1],
        vec![Value::Integer(2), Value::Text("Bob".to_string())]
    );
}

#[test]
fn test_query_reports_affected_rows_for_writes() {
    let (_guard, bridge, conn) = open_local("affected");

    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();
    let result = bridge
        .query(conn, "INSERT INTO t (n) VALUES (1), (2), (3)", vec![])
        .unwrap();
    assert!(result.columns.is_empty());
    assert!(result.rows.is_empty());
    assert_eq!(result.num_rows, 3);

    let returning = bridge
        .query(conn, "INSERT INTO t (n) VALUES (?) RETURNING n", vec![7_i64.into()])
        .unwrap();
    assert_eq!(ints(&returning), vec![7]);
}

#[test]
fn test_value_types_round_trip() {
    let (_guard, bridge, conn) = open_local("types");

    bridge
        .execute(
            conn,
            "CREATE TABLE v (i INTEGER, r REAL, t TEXT, b BLOB, n TEXT)",
            vec![],
        )
        .unwrap();
    bridge
        .execute(
            conn,
            "INSERT INTO v VALUES (?, ?, ?, ?, ?)",
            vec![
                Value::Integer(-5),
                Value::Real(2.5),
                Value::Text("héllo".to_string()),
                Value::Blob(vec![0, 159, 255]),
                Value::Null,
            ],
        )
        .unwrap();

    let result = bridge.query(conn, "SELECT * FROM v", vec![]).unwrap();
    assert_eq!(
        result.rows[0],
        vec![
            Value::Integer(-5),
            Value::Real(2.5),
            Value::Text("héllo".to_string()),
            Value::Blob(vec![0, 159, 255]),
            Value::Null,
        ]
    );
}

#[test]
fn test_savepoint_rollback_keeps_earlier_work() {
    let (_guard, bridge, conn) = open_local("savepoint");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();

    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();
    bridge
        .execute_in_transaction(conn, trx, "INSERT INTO t VALUES (1)", vec![])
        .unwrap();
    bridge.savepoint(conn, trx, "a").unwrap();
    bridge
        .execute_in_transaction(conn, trx, "INSERT INTO t VALUES (2)", vec![])
        .unwrap();
    bridge.rollback_to_savepoint(conn, trx, "a").unwrap();
    assert_eq!(bridge.savepoints(conn, trx).unwrap(), vec!["a"]);
    bridge.commit(conn, trx).unwrap();

    let result = bridge.query(conn, "SELECT n FROM t", vec![]).unwrap();
    assert_eq!(ints(&result), vec![1]);
}

#[test]
fn test_rollback_to_savepoint_can_repeat() {
    let (_guard, bridge, conn) = open_local("savepoint_nested");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();

    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();
    bridge.savepoint(conn, trx, "sp1").unwrap();
    bridge
        .execute_in_transaction(conn, trx, "INSERT INTO t VALUES (1)", vec![])
        .unwrap();
    bridge.savepoint(conn, trx, "sp2").unwrap();
    bridge
        .execute_in_transaction(conn, trx, "INSERT INTO t VALUES (2)", vec![])
        .unwrap();

    bridge.rollback_to_savepoint(conn, trx, "sp1").unwrap();
    assert_eq!(bridge.savepoints(conn, trx).unwrap(), vec!["sp1"]);
    let err = bridge.release_savepoint(conn, trx, "sp2").unwrap_err();
    assert!(matches!(err, BridgeError::NotFound { .. }), "got {err:?}");

    bridge
        .execute_in_transaction(conn, trx, "INSERT INTO t VALUES (3)", vec![])
        .unwrap();
    bridge.rollback_to_savepoint(conn, trx, "sp1").unwrap();
    bridge.commit(conn, trx).unwrap();

    let result = bridge.query(conn, "SELECT n FROM t", vec![]).unwrap();
    assert_eq!(result.num_rows, 0);
}

#[test]
fn test_savepoint_names_match_case_insensitively() {
    let (_guard, bridge, conn) = open_local("savepoint_case");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();

    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();
    for (name, n) in [("a", 1_i64), ("x", 2_i64), ("A", 3_i64)] {
        bridge.savepoint(conn, trx, name).unwrap();
        bridge
            .execute_in_transaction(conn, trx, "INSERT INTO t VALUES (?)", vec![n.into()])
            .unwrap();
    }

    // SQLite releases the most recent match, which is `A`
    bridge.release_savepoint(conn, trx, "a").unwrap();
    assert_eq!(bridge.savepoints(conn, trx).unwrap(), vec!["a", "x"]);

    bridge.rollback_to_savepoint(conn, trx, "X").unwrap();
    assert_eq!(bridge.savepoints(conn, trx).unwrap(), vec!["a", "x"]);
    bridge.release_savepoint(conn, trx, "x").unwrap();
    assert_eq!(bridge.savepoints(conn, trx).unwrap(), vec!["a"]);
    bridge.commit(conn, trx).unwrap();

    let result = bridge.query(conn, "SELECT n FROM t", vec![]).unwrap();
    assert_eq!(ints(&result), vec![1]);
}

#[test]
fn test_release_savepoint_pops_later_savepoints() {
    let (_guard, bridge, conn) = open_local("release");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();

    let trx = bridge.begin(conn, TransactionBehavior::Immediate).unwrap();
    bridge.savepoint(conn, trx, "a").unwrap();
    bridge.savepoint(conn, trx, "b").unwrap();
    bridge.savepoint(conn, trx, "a").unwrap();
    bridge.savepoint(conn, trx, "c").unwrap();

    // the most recent "a" goes, together with "c"
    bridge.release_savepoint(conn, trx, "a").unwrap();
    assert_eq!(bridge.savepoints(conn, trx).unwrap(), vec!["a", "b"]);

    bridge.release_savepoint(conn, trx, "a").unwrap();
    assert!(bridge.savepoints(conn, trx).unwrap().is_empty());

    let err = bridge.release_savepoint(conn, trx, "a").unwrap_err();
    assert!(matches!(err, BridgeError::NotFound { .. }), "got {err:?}");

    bridge.rollback(conn, trx).unwrap();
}

#[test]
fn test_invalid_savepoint_name_is_rejected() {
    let (_guard, bridge, conn) = open_local("sp_name");
    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();

    for name in ["", "1abc", "a-b", "a; DROP TABLE t"] {
        let err = bridge.savepoint(conn, trx, name).unwrap_err();
        assert!(
            matches!(
                err,
                BridgeError::Sql {
                    kind: SqlErrorKind::Syntax,
                    ..
                }
            ),
            "{name:?}: {err:?}"
        );
    }
    assert!(bridge.savepoints(conn, trx).unwrap().is_empty());
    bridge.rollback(conn, trx).unwrap();
}

#[test]
fn test_rollback_discards_changes() {
    let (_guard, bridge, conn) = open_local("rollback");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();

    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();
    let result = bridge
        .query_in_transaction(conn, trx, "INSERT INTO t VALUES (1) RETURNING n", vec![])
        .unwrap();
    assert_eq!(ints(&result), vec![1]);
    assert!(!bridge.is_autocommit(conn).unwrap());
    bridge.rollback(conn, trx).unwrap();

    assert!(bridge.is_autocommit(conn).unwrap());
    let result = bridge.query(conn, "SELECT n FROM t", vec![]).unwrap();
    assert_eq!(result.num_rows, 0);
}

#[test]
fn test_second_begin_is_rejected() {
    let (_guard, bridge, conn) = open_local("double_begin");

    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();
    let err = bridge.begin(conn, TransactionBehavior::Deferred).unwrap_err();
    assert!(
        matches!(err, BridgeError::AlreadyInTransaction { .. }),
        "got {err:?}"
    );

    bridge.commit(conn, trx).unwrap();
    let next = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();
    assert_ne!(next, trx);
    bridge.rollback(conn, next).unwrap();
}

#[test]
fn test_finished_transaction_is_gone() {
    let (_guard, bridge, conn) = open_local("finished");

    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();
    assert!(bridge.transaction_status(conn, trx).unwrap());
    bridge.commit(conn, trx).unwrap();

    assert!(!bridge.transaction_status(conn, trx).unwrap());
    let err = bridge.commit(conn, trx).unwrap_err();
    assert!(matches!(err, BridgeError::NotFound { .. }), "got {err:?}");
    let err = bridge.rollback(conn, trx).unwrap_err();
    assert!(matches!(err, BridgeError::NotFound { .. }), "got {err:?}");
    let err = bridge
        .execute_in_transaction(conn, trx, "SELECT 1", vec![])
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotFound { .. }), "got {err:?}");

    // the idempotent cleanup path
    bridge.close_transaction(conn, trx).unwrap();
}

#[test]
fn test_close_transaction_rolls_back() {
    let (_guard, bridge, conn) = open_local("close_trx");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();

    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();
    bridge
        .execute_in_transaction(conn, trx, "INSERT INTO t VALUES (1)", vec![])
        .unwrap();
    bridge.close_transaction(conn, trx).unwrap();
    bridge.close_transaction(conn, trx).unwrap();

    assert!(bridge.is_autocommit(conn).unwrap());
    let result = bridge.query(conn, "SELECT n FROM t", vec![]).unwrap();
    assert_eq!(result.num_rows, 0);
}

#[test]
fn test_prepared_statement_rebinds_parameters() {
    let (_guard, bridge, conn) = open_local("prepared");

    let stmt = bridge.prepare(conn, "SELECT ? AS v").unwrap();
    assert_eq!(bridge.statement_parameter_count(conn, stmt).unwrap(), 1);
    assert_eq!(bridge.statement_column_count(conn, stmt).unwrap(), 1);
    assert_eq!(bridge.statement_column_name(conn, stmt, 0).unwrap(), "v");

    let first = bridge.query_statement(conn, stmt, vec![42_i64.into()]).unwrap();
    assert_eq!(first.columns, vec!["v"]);
    assert_eq!(ints(&first), vec![42]);

    let second = bridge.query_statement(conn, stmt, vec![99_i64.into()]).unwrap();
    assert_eq!(ints(&second), vec![99]);

    bridge.close_statement(conn, stmt).unwrap();
}

#[test]
fn test_prepared_statement_execute() {
    let (_guard, bridge, conn) = open_local("prepared_exec");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();

    let stmt = bridge.prepare(conn, "INSERT INTO t (n) VALUES (?)").unwrap();
    for n in 0..3_i64 {
        assert_eq!(bridge.execute_statement(conn, stmt, vec![n.into()]).unwrap(), 1);
    }
    assert_eq!(bridge.last_insert_rowid(conn).unwrap(), 3);
    assert_eq!(bridge.changes(conn).unwrap(), 1);
    assert_eq!(bridge.total_changes(conn).unwrap(), 3);

    let result = bridge.query(conn, "SELECT n FROM t ORDER BY n", vec![]).unwrap();
    assert_eq!(ints(&result), vec![0, 1, 2]);
}

#[test]
fn test_statement_arity_mismatch_is_rejected() {
    let (_guard, bridge, conn) = open_local("arity");

    let stmt = bridge.prepare(conn, "SELECT ?1 + ?2").unwrap();
    assert_eq!(bridge.statement_parameter_count(conn, stmt).unwrap(), 2);
    bridge
        .query_statement(conn, stmt, vec![1_i64.into(), 2_i64.into()])
        .unwrap();

    for params in [vec![], vec![Value::Integer(1)], vec![1_i64.into(), 2_i64.into(), 3_i64.into()]] {
        let err = bridge.query_statement(conn, stmt, params).unwrap_err();
        assert!(
            matches!(
                err,
                BridgeError::Sql {
                    kind: SqlErrorKind::Misuse,
                    ..
                }
            ),
            "got {err:?}"
        );
    }
}

#[test]
fn test_statement_column_name_out_of_range() {
    let (_guard, bridge, conn) = open_local("column_range");

    let stmt = bridge.prepare(conn, "SELECT 1 AS a, 2 AS b").unwrap();
    assert_eq!(bridge.statement_column_name(conn, stmt, 1).unwrap(), "b");

    let err = bridge.statement_column_name(conn, stmt, 2).unwrap_err();
    assert!(
        matches!(err, BridgeError::OutOfRange { index: 2, len: 2 }),
        "got {err:?}"
    );
}

#[test]
fn test_prepare_syntax_error() {
    let (_guard, bridge, conn) = open_local("prepare_syntax");

    let err = bridge.prepare(conn, "SELEC nothing").unwrap_err();
    assert!(matches!(err, BridgeError::Sql { .. }), "got {err:?}");
    assert_eq!(err.kind(), "syntax");
}

#[test]
fn test_cursor_fetches_in_batches() {
    let (_guard, bridge, conn) = open_local("cursor");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();
    bridge
        .execute(conn, "INSERT INTO t VALUES (1), (2), (3), (4), (5)", vec![])
        .unwrap();

    let cursor = bridge
        .declare_cursor(conn, "SELECT n FROM t ORDER BY n", vec![], 2)
        .unwrap();

    let first = bridge.fetch(conn, cursor).unwrap();
    assert_eq!(first.columns, vec!["n"]);
    assert_eq!(first.rows.len(), 2);
    assert!(first.has_more);

    let second = bridge.fetch(conn, cursor).unwrap();
    assert_eq!(second.rows.len(), 2);
    assert!(second.has_more);

    let third = bridge.fetch(conn, cursor).unwrap();
    assert_eq!(third.rows, vec![vec![Value::Integer(5)]]);
    assert!(!third.has_more);

    // exhausted cursors keep answering with an empty batch
    for _ in 0..2 {
        let empty = bridge.fetch(conn, cursor).unwrap();
        assert!(empty.rows.is_empty());
        assert!(!empty.has_more);
    }

    bridge.close_cursor(conn, cursor).unwrap();
}

#[test]
fn test_cursor_exact_multiple_of_batch_size() {
    let (_guard, bridge, conn) = open_local("cursor_exact");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();
    bridge
        .execute(conn, "INSERT INTO t VALUES (1), (2), (3), (4)", vec![])
        .unwrap();

    let cursor = bridge
        .declare_cursor(conn, "SELECT n FROM t", vec![], 2)
        .unwrap();
    assert!(bridge.fetch(conn, cursor).unwrap().has_more);
    let last = bridge.fetch(conn, cursor).unwrap();
    assert_eq!(last.rows.len(), 2);
    assert!(!last.has_more, "look-ahead must see the end of the stream");
}

#[test]
fn test_cursor_over_empty_result() {
    let (_guard, bridge, conn) = open_local("cursor_empty");

    let cursor = bridge
        .declare_cursor(conn, "SELECT 1 WHERE 0", vec![], 10)
        .unwrap();
    let batch = bridge.fetch(conn, cursor).unwrap();
    assert!(batch.rows.is_empty());
    assert!(!batch.has_more);

    let entry = bridge.registries().cursors.resolve(&cursor).unwrap();
    let state = bridge
        .run("cursor_state", async move { Ok(entry.lock().await.state()) })
        .unwrap();
    assert_eq!(state, CursorState::Exhausted);
}

#[test]
fn test_cursor_zero_batch_size_is_invalid() {
    let (_guard, bridge, conn) = open_local("cursor_zero");

    let err = bridge
        .declare_cursor(conn, "SELECT 1", vec![], 0)
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArgument(_)), "got {err:?}");
}

#[test]
fn test_cursor_closed_mid_stream() {
    let (_guard, bridge, conn) = open_local("cursor_close");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();
    bridge
        .execute(conn, "INSERT INTO t VALUES (1), (2), (3)", vec![])
        .unwrap();

    let cursor = bridge
        .declare_cursor(conn, "SELECT n FROM t", vec![], 1)
        .unwrap();
    assert!(bridge.fetch(conn, cursor).unwrap().has_more);

    bridge.close_cursor(conn, cursor).unwrap();
    bridge.close_cursor(conn, cursor).unwrap();
    let err = bridge.fetch(conn, cursor).unwrap_err();
    assert!(matches!(err, BridgeError::NotFound { .. }), "got {err:?}");

    // the connection is still usable for writes
    bridge
        .execute(conn, "INSERT INTO t VALUES (4)", vec![])
        .unwrap();
}

#[test]
fn test_cursor_in_transaction_sees_uncommitted_rows() {
    let (_guard, bridge, conn) = open_local("cursor_trx");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();

    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();
    bridge
        .execute_in_transaction(conn, trx, "INSERT INTO t VALUES (1), (2)", vec![])
        .unwrap();
    let cursor = bridge
        .declare_cursor_in_transaction(conn, trx, "SELECT n FROM t ORDER BY n", vec![], 5)
        .unwrap();

    let batch = bridge.fetch(conn, cursor).unwrap();
    assert_eq!(batch.rows.len(), 2);
    assert!(!batch.has_more);

    bridge.close_cursor(conn, cursor).unwrap();
    bridge.rollback(conn, trx).unwrap();
}

#[test]
fn test_execute_batch_stops_at_first_error() {
    let (_guard, bridge, conn) = open_local("batch");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();

    let results = bridge
        .execute_batch(
            conn,
            vec![
                ("INSERT INTO t VALUES (?)".to_string(), vec![1_i64.into()]),
                ("SELECT count(*) FROM t".to_string(), vec![]),
            ],
        )
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].num_rows, 1);
    assert_eq!(ints(&results[1]), vec![1]);

    let err = bridge
        .execute_batch(
            conn,
            vec![
                ("INSERT INTO t VALUES (2)".to_string(), vec![]),
                ("INSERT INTO missing VALUES (3)".to_string(), vec![]),
                ("INSERT INTO t VALUES (4)".to_string(), vec![]),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, BridgeError::Sql { .. }), "got {err:?}");

    let result = bridge.query(conn, "SELECT n FROM t ORDER BY n", vec![]).unwrap();
    assert_eq!(ints(&result), vec![1, 2]);
}

#[test]
fn test_transactional_batch_rolls_back_on_failure() {
    let (_guard, bridge, conn) = open_local("trx_batch");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER UNIQUE)", vec![])
        .unwrap();

    let err = bridge
        .execute_transactional_batch(
            conn,
            vec![
                ("INSERT INTO t VALUES (1)".to_string(), vec![]),
                ("INSERT INTO t VALUES (2)".to_string(), vec![]),
                ("INSERT INTO t VALUES (1)".to_string(), vec![]),
            ],
        )
        .unwrap_err();
    assert_eq!(err.kind(), "constraint_violation");

    let result = bridge.query(conn, "SELECT n FROM t", vec![]).unwrap();
    assert_eq!(result.num_rows, 0, "failed batch must leave no rows");
    assert!(bridge.is_autocommit(conn).unwrap());

    let results = bridge
        .execute_transactional_batch(
            conn,
            vec![
                ("INSERT INTO t VALUES (1)".to_string(), vec![]),
                ("INSERT INTO t VALUES (2)".to_string(), vec![]),
            ],
        )
        .unwrap();
    assert_eq!(results.len(), 2);
    let result = bridge.query(conn, "SELECT n FROM t", vec![]).unwrap();
    assert_eq!(result.num_rows, 2);
}

#[test]
fn test_transactional_batch_inside_transaction_is_rejected() {
    let (_guard, bridge, conn) = open_local("trx_batch_nested");

    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();
    let err = bridge
        .execute_transactional_batch(conn, vec![("SELECT 1".to_string(), vec![])])
        .unwrap_err();
    assert!(
        matches!(err, BridgeError::AlreadyInTransaction { .. }),
        "got {err:?}"
    );
    bridge.rollback(conn, trx).unwrap();
}

#[test]
fn test_unique_violation_names_the_index() {
    let (_guard, bridge, conn) = open_local("constraint");
    bridge
        .execute(conn, "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT)", vec![])
        .unwrap();
    bridge
        .execute(conn, "CREATE UNIQUE INDEX users_email_index ON users (email)", vec![])
        .unwrap();
    bridge
        .execute(conn, "INSERT INTO users (email) VALUES ('a@b.c')", vec![])
        .unwrap();

    let err = bridge
        .execute(conn, "INSERT INTO users (email) VALUES ('a@b.c')", vec![])
        .unwrap_err();
    match err {
        BridgeError::Sql {
            kind: SqlErrorKind::ConstraintViolation,
            constraint,
            ..
        } => assert_eq!(constraint.as_deref(), Some("users_email_index")),
        other => panic!("expected constraint violation, got {other:?}"),
    }
}

#[test]
fn test_pragma_query() {
    let (_guard, bridge, conn) = open_local("pragma");

    bridge.pragma(conn, "PRAGMA foreign_keys = ON").unwrap();
    let result = bridge.pragma(conn, "PRAGMA foreign_keys").unwrap();
    assert_eq!(ints(&result), vec![1]);
}

#[test]
fn test_two_connections_commit_independently() {
    let guard = TestDbGuard::new(setup_test_db_with_prefix("concurrent"));
    let bridge = test_bridge();
    let setup = bridge.connect(ConnectConfig::local(guard.path())).unwrap();
    bridge
        .execute(setup, "CREATE TABLE t (writer TEXT)", vec![])
        .unwrap();

    let writers: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|name| {
            let bridge = bridge.clone();
            let conn = bridge.connect(ConnectConfig::local(guard.path())).unwrap();
            thread::spawn(move || {
                let trx = bridge.begin(conn, TransactionBehavior::Immediate).unwrap();
                bridge
                    .execute_in_transaction(conn, trx, "INSERT INTO t VALUES (?)", vec![name.into()])
                    .unwrap();
                bridge.commit(conn, trx).unwrap();
                bridge.close_connection(conn).unwrap();
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let result = bridge
        .query(setup, "SELECT writer FROM t ORDER BY writer", vec![])
        .unwrap();
    assert_eq!(
        result.rows,
        vec![vec![Value::from("a")], vec![Value::from("b")]]
    );
}

#[test]
fn test_lock_contention_surfaces_busy_after_timeout() {
    let guard = TestDbGuard::new(setup_test_db_with_prefix("busy"));
    let bridge = test_bridge();
    let holder = bridge.connect(ConnectConfig::local(guard.path())).unwrap();
    let waiter = bridge
        .connect(ConnectConfig::local(guard.path()).with_busy_timeout(Duration::from_millis(50)))
        .unwrap();
    bridge
        .execute(holder, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();

    let trx = bridge.begin(holder, TransactionBehavior::Exclusive).unwrap();
    let err = bridge
        .execute(waiter, "INSERT INTO t VALUES (1)", vec![])
        .unwrap_err();
    assert!(matches!(err, BridgeError::Busy { .. }), "got {err:?}");
    assert!(err.is_retryable());

    bridge.commit(holder, trx).unwrap();
    bridge
        .execute(waiter, "INSERT INTO t VALUES (1)", vec![])
        .unwrap();
}

#[test]
fn test_close_connection_waits_for_blocked_begin() {
    let guard = TestDbGuard::new(setup_test_db_with_prefix("close_during_begin"));
    let bridge = test_bridge();
    let blocker = bridge.connect(ConnectConfig::local(guard.path())).unwrap();
    let victim = bridge
        .connect(ConnectConfig::local(guard.path()).with_busy_timeout(Duration::from_secs(5)))
        .unwrap();
    bridge
        .execute(blocker, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();
    let held = bridge.begin(blocker, TransactionBehavior::Exclusive).unwrap();

    let begin = {
        let bridge = bridge.clone();
        thread::spawn(move || bridge.begin(victim, TransactionBehavior::Immediate))
    };
    thread::sleep(Duration::from_millis(100));
    let close = {
        let bridge = bridge.clone();
        thread::spawn(move || bridge.close_connection(victim))
    };
    thread::sleep(Duration::from_millis(100));
    bridge.commit(blocker, held).unwrap();

    let begun = begin.join().unwrap();
    close.join().unwrap().unwrap();

    // whatever `begin` returned, the close came after it and took the
    // transaction down with the connection
    if let Ok(trx) = begun {
        let err = bridge.transaction_status(victim, trx).unwrap_err();
        assert_eq!(err.kind(), "owner_closed", "got {err:?}");
    }
    assert!(bridge.registries().transactions.is_empty().unwrap());
    assert_eq!(bridge.connection_count().unwrap(), 1);
    let err = bridge
        .begin(victim, TransactionBehavior::Immediate)
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotFound { .. }), "got {err:?}");

    // no write lock outlives the closed connection
    let fresh = bridge
        .connect(ConnectConfig::local(guard.path()).with_busy_timeout(Duration::from_millis(200)))
        .unwrap();
    bridge
        .execute(fresh, "INSERT INTO t VALUES (1)", vec![])
        .unwrap();
}

#[test]
fn test_tombstones_are_bounded_after_close() {
    let (_guard, bridge, conn) = open_local("tombstones");
    let statements: Vec<_> = (0..MAX_ORPHANED_HANDLES + 10)
        .map(|_| bridge.prepare(conn, "SELECT 1").unwrap())
        .collect();

    bridge.close_connection(conn).unwrap();
    let registries = bridge.registries();
    assert!(registries.statements.is_empty().unwrap());
    assert_eq!(registries.statements.orphaned().unwrap(), MAX_ORPHANED_HANDLES);

    for stmt in &statements {
        bridge.close_statement(conn, *stmt).unwrap();
    }
    assert_eq!(registries.statements.orphaned().unwrap(), 0);
}

#[test]
fn test_close_connection_is_idempotent() {
    let (_guard, bridge, conn) = open_local("close_twice");
    let stmt = bridge.prepare(conn, "SELECT 1").unwrap();

    bridge.close_statement(conn, stmt).unwrap();
    bridge.close_statement(conn, stmt).unwrap();

    bridge.close_connection(conn).unwrap();
    bridge.close_connection(conn).unwrap();
    assert_eq!(bridge.connection_count().unwrap(), 0);

    let err = bridge.ping(conn).unwrap_err();
    assert!(matches!(err, BridgeError::NotFound { .. }), "got {err:?}");
}

#[test]
fn test_children_report_owner_closed() {
    let (_guard, bridge, conn) = open_local("owner_closed");
    bridge
        .execute(conn, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();
    bridge
        .execute(conn, "INSERT INTO t VALUES (1), (2)", vec![])
        .unwrap();

    let stmt = bridge.prepare(conn, "SELECT n FROM t").unwrap();
    let cursor = bridge
        .declare_cursor(conn, "SELECT n FROM t", vec![], 1)
        .unwrap();
    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();

    bridge.close_connection(conn).unwrap();

    let results = [
        bridge.query_statement(conn, stmt, vec![]).map(|_| ()),
        bridge.statement_column_count(conn, stmt).map(|_| ()),
        bridge.fetch(conn, cursor).map(|_| ()),
        bridge.commit(conn, trx),
        bridge.savepoint(conn, trx, "a"),
        bridge
            .execute_in_transaction(conn, trx, "SELECT 1", vec![])
            .map(|_| ()),
    ];
    for result in results {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), "owner_closed", "got {err:?}");
    }

    // closing orphans is fine
    bridge.close_statement(conn, stmt).unwrap();
    bridge.close_cursor(conn, cursor).unwrap();
    bridge.close_transaction(conn, trx).unwrap();
}

#[test]
fn test_handles_of_another_connection_are_rejected() {
    let guard = TestDbGuard::new(setup_test_db_with_prefix("mismatch"));
    let bridge = test_bridge();
    let owner = bridge.connect(ConnectConfig::local(guard.path())).unwrap();
    let intruder = bridge.connect(ConnectConfig::local(guard.path())).unwrap();

    bridge
        .execute(owner, "CREATE TABLE t (n INTEGER)", vec![])
        .unwrap();
    let stmt = bridge.prepare(owner, "SELECT n FROM t").unwrap();
    let cursor = bridge
        .declare_cursor(owner, "SELECT 1 UNION ALL SELECT 2", vec![], 1)
        .unwrap();
    let trx = bridge.begin(owner, TransactionBehavior::Deferred).unwrap();

    let results = [
        bridge.execute_statement(intruder, stmt, vec![]).map(|_| ()),
        bridge.query_statement(intruder, stmt, vec![]).map(|_| ()),
        bridge.statement_column_count(intruder, stmt).map(|_| ()),
        bridge.statement_column_name(intruder, stmt, 0).map(|_| ()),
        bridge.statement_parameter_count(intruder, stmt).map(|_| ()),
        bridge.close_statement(intruder, stmt),
        bridge.fetch(intruder, cursor).map(|_| ()),
        bridge.close_cursor(intruder, cursor),
        bridge
            .execute_in_transaction(intruder, trx, "SELECT 1", vec![])
            .map(|_| ()),
        bridge
            .query_in_transaction(intruder, trx, "SELECT 1", vec![])
            .map(|_| ()),
        bridge.savepoint(intruder, trx, "a"),
        bridge.release_savepoint(intruder, trx, "a"),
        bridge.rollback_to_savepoint(intruder, trx, "a"),
        bridge
            .declare_cursor_in_transaction(intruder, trx, "SELECT 1", vec![], 1)
            .map(|_| ()),
        bridge.transaction_status(intruder, trx).map(|_| ()),
        bridge.commit(intruder, trx),
        bridge.rollback(intruder, trx),
        bridge.close_transaction(intruder, trx),
    ];
    for result in results {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), "owner_mismatch", "got {err:?}");
    }

    // nothing was disturbed for the real owner
    assert_eq!(bridge.fetch(owner, cursor).unwrap().rows.len(), 1);
    assert_eq!(bridge.statement_column_count(owner, stmt).unwrap(), 1);
    bridge.commit(owner, trx).unwrap();
}

#[test]
fn test_lease_closes_connection_on_drop() {
    let guard = TestDbGuard::new(setup_test_db_with_prefix("lease"));
    let bridge = test_bridge();

    let lease = bridge.lease(ConnectConfig::local(guard.path())).unwrap();
    let conn = lease.id();
    assert!(lease.bridge().ping(conn).unwrap());
    let stmt = bridge.prepare(conn, "SELECT 1").unwrap();

    drop(lease);

    assert_eq!(bridge.connection_count().unwrap(), 0);
    assert_eq!(
        bridge.statement_column_count(conn, stmt).unwrap_err().kind(),
        "owner_closed"
    );
}

#[test]
fn test_connection_maintenance_operations() {
    let (_guard, bridge, conn) = open_local("maintenance");

    bridge
        .set_busy_timeout(conn, Duration::from_millis(250))
        .unwrap();
    bridge.reset_connection(conn).unwrap();
    bridge.interrupt_connection(conn).unwrap();

    // an interrupt only affects statements running at the time
    assert!(bridge.ping(conn).unwrap());
}

#[test]
fn test_replication_is_a_no_op_for_local_databases() {
    let (_guard, bridge, conn) = open_local("replication");

    assert_eq!(bridge.sync(conn).unwrap().frame_no, None);
    assert_eq!(bridge.frame_number(conn).unwrap(), 0);
    bridge.sync_until(conn, 10).unwrap();
    assert_eq!(bridge.flush_replicator(conn).unwrap(), 0);
    assert_eq!(bridge.max_write_replication_index(conn).unwrap(), 0);
}

#[test]
fn test_encrypted_local_database() {
    let guard = TestDbGuard::new(setup_test_db_with_prefix("encrypted"));
    let bridge = test_bridge();
    let key = "0123456789abcdef0123456789abcdef";

    let conn = bridge
        .connect(ConnectConfig::local(guard.path()).with_encryption_key(key))
        .unwrap();
    bridge
        .execute(conn, "CREATE TABLE secrets (s TEXT)", vec![])
        .unwrap();
    bridge
        .execute(conn, "INSERT INTO secrets VALUES ('hidden')", vec![])
        .unwrap();
    bridge.close_connection(conn).unwrap();

    let reopened = bridge
        .connect(ConnectConfig::local(guard.path()).with_encryption_key(key))
        .unwrap();
    let result = bridge.query(reopened, "SELECT s FROM secrets", vec![]).unwrap();
    assert_eq!(result.rows, vec![vec![Value::from("hidden")]]);
}

#[test]
fn test_bridge_rejects_calls_from_async_context() {
    let (_guard, bridge, conn) = open_local("async_context");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let err = runtime.block_on(async { bridge.ping(conn) }).unwrap_err();
    assert!(matches!(err, BridgeError::Runtime(_)), "got {err:?}");
    drop(runtime);

    assert!(bridge.ping(conn).unwrap());
}

#[test]
fn test_closes_from_async_context_leave_handles_open() {
    let (_guard, bridge, conn) = open_local("close_async_context");
    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();
    let stmt = bridge.prepare(conn, "SELECT 1").unwrap();
    let cursor = bridge.declare_cursor(conn, "SELECT 1", vec![], 1).unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let results = runtime.block_on(async {
        [
            bridge.close_transaction(conn, trx),
            bridge.close_statement(conn, stmt),
            bridge.close_cursor(conn, cursor),
            bridge.close_connection(conn),
        ]
    });
    drop(runtime);
    for result in results {
        let err = result.unwrap_err();
        assert!(matches!(err, BridgeError::Runtime(_)), "got {err:?}");
    }

    assert!(bridge.transaction_status(conn, trx).unwrap());
    assert!(!bridge.is_autocommit(conn).unwrap());
    assert_eq!(bridge.statement_column_count(conn, stmt).unwrap(), 1);
    assert!(bridge.fetch(conn, cursor).is_ok());

    bridge.close_transaction(conn, trx).unwrap();
    assert!(bridge.is_autocommit(conn).unwrap());
    bridge.close_connection(conn).unwrap();
}
