//! Error handling tests for the bridge
//!
//! These tests verify that every failure comes back as a classified
//! `BridgeError` instead of a panic, which is critical when the bridge is
//! loaded into the BEAM VM.
//!
//! Focus areas:
//! 1. Invalid handles (malformed, unknown, wrong kind)
//! 2. Constraint violations (NOT NULL, UNIQUE, CHECK, FOREIGN KEY)
//! 3. Query syntax errors (invalid SQL, non-existent table/column)
//! 4. Configuration errors caught before any I/O

#![allow(clippy::unwrap_used)]

use super::test_utils::{open_local, test_bridge};
use crate::error::{BridgeError, ConnectionErrorKind, NotFoundKind, SqlErrorKind};
use crate::{
    Bridge, BridgeConfig, ConnectConfig, ConnectionId, CursorId, Handle, StatementId,
    TransactionBehavior, TransactionId,
};

fn assert_sql_kind(err: &BridgeError, expected: SqlErrorKind) {
    match err {
        BridgeError::Sql { kind, .. } => assert_eq!(*kind, expected, "got {err:?}"),
        other => panic!("expected {expected:?}, got {other:?}"),
    }
}

// ============================================================================
// INVALID HANDLE TESTS
// ============================================================================

#[test]
fn test_malformed_handles_are_rejected() {
    for raw in [
        "",
        "conn",
        "conn-",
        "conn-zz-00000000-0000-0000-0000-000000000000",
        "conn-1-not-a-uuid",
        "1-67e55044-10b1-426f-9247-bb680e5fe0c8",
        "CONN-1-67e55044-10b1-426f-9247-bb680e5fe0c8",
    ] {
        let err = raw.parse::<ConnectionId>().unwrap_err();
        assert!(
            matches!(
                err,
                BridgeError::NotFound {
                    kind: NotFoundKind::UnknownHandle,
                    ..
                }
            ),
            "{raw:?}: {err:?}"
        );
    }
}

#[test]
fn test_handle_of_another_kind_is_rejected() {
    let trx = TransactionId::allocate().to_string();
    assert!(trx.starts_with("trx-"));

    let err = trx.parse::<ConnectionId>().unwrap_err();
    assert_eq!(err.kind(), "not_found");
    assert!(err.to_string().contains("connection"), "{err}");

    assert!(trx.parse::<StatementId>().is_err());
    assert!(trx.parse::<CursorId>().is_err());
    assert!(trx.parse::<TransactionId>().is_ok());
}

#[test]
fn test_operations_on_unknown_connection() {
    let bridge = test_bridge();
    let ghost = ConnectionId::allocate();

    let results = [
        bridge.ping(ghost).map(|_| ()),
        bridge.execute(ghost, "SELECT 1", vec![]).map(|_| ()),
        bridge.query(ghost, "SELECT 1", vec![]).map(|_| ()),
        bridge.prepare(ghost, "SELECT 1").map(|_| ()),
        bridge
            .begin(ghost, TransactionBehavior::Deferred)
            .map(|_| ()),
        bridge.declare_cursor(ghost, "SELECT 1", vec![], 10).map(|_| ()),
        bridge.last_insert_rowid(ghost).map(|_| ()),
        bridge.sync(ghost).map(|_| ()),
    ];
    for result in results {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), "not_found", "got {err:?}");
    }

    // closing is idempotent even for handles the bridge never issued
    bridge.close_connection(ghost).unwrap();
}

#[test]
fn test_operations_on_unknown_children() {
    let (_guard, bridge, conn) = open_local("unknown_children");

    let stmt = StatementId::allocate();
    let trx = TransactionId::allocate();
    let cursor = CursorId::allocate();

    let results = [
        bridge.query_statement(conn, stmt, vec![]).map(|_| ()),
        bridge.statement_column_count(conn, stmt).map(|_| ()),
        bridge.fetch(conn, cursor).map(|_| ()),
        bridge.commit(conn, trx),
        bridge.rollback(conn, trx),
        bridge.savepoint(conn, trx, "a"),
    ];
    for result in results {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), "not_found", "got {err:?}");
    }

    assert!(!bridge.transaction_status(conn, trx).unwrap());
    bridge.close_statement(conn, stmt).unwrap();
    bridge.close_cursor(conn, cursor).unwrap();
    bridge.close_transaction(conn, trx).unwrap();
}

#[test]
fn test_unknown_savepoint() {
    let (_guard, bridge, conn) = open_local("unknown_savepoint");
    let trx = bridge.begin(conn, TransactionBehavior::Deferred).unwrap();

    for result in [
        bridge.release_savepoint(conn, trx, "never_created"),
        bridge.rollback_to_savepoint(conn, trx, "never_created"),
    ] {
        let err = result.unwrap_err();
        assert!(
            matches!(
                err,
                BridgeError::NotFound {
                    kind: NotFoundKind::UnknownSavepoint,
                    ..
                }
            ),
            "got {err:?}"
        );
    }

    // the transaction is untouched
    assert!(bridge.transaction_status(conn, trx).unwrap());
    bridge.commit(conn, trx).unwrap();
}

// ============================================================================
// CONSTRAINT VIOLATION TESTS
// ============================================================================

#[test]
fn test_not_null_constraint_violation() {
    let (_guard, bridge, conn) = open_local("not_null");
    bridge
        .execute(
            conn,
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
            vec![],
        )
        .unwrap();

    let err = bridge
        .execute(conn, "INSERT INTO users (id) VALUES (1)", vec![])
        .unwrap_err();
    assert_sql_kind(&err, SqlErrorKind::ConstraintViolation);
    assert!(err.to_string().contains("NOT NULL"), "{err}");
}

#[test]
fn test_primary_key_violation() {
    let (_guard, bridge, conn) = open_local("primary_key");
    bridge
        .execute(conn, "CREATE TABLE t (id INTEGER PRIMARY KEY)", vec![])
        .unwrap();
    bridge
        .execute(conn, "INSERT INTO t VALUES (1)", vec![])
        .unwrap();

    let err = bridge
        .execute(conn, "INSERT INTO t VALUES (1)", vec![])
        .unwrap_err();
    assert_sql_kind(&err, SqlErrorKind::ConstraintViolation);
}

#[test]
fn test_check_constraint_violation() {
    let (_guard, bridge, conn) = open_local("check");
    bridge
        .execute(
            conn,
            "CREATE TABLE accounts (balance INTEGER CHECK (balance >= 0))",
            vec![],
        )
        .unwrap();

    let err = bridge
        .execute(conn, "INSERT INTO accounts VALUES (?)", vec![(-1_i64).into()])
        .unwrap_err();
    assert_sql_kind(&err, SqlErrorKind::ConstraintViolation);
    match err {
        BridgeError::Sql { constraint, .. } => assert_eq!(constraint, None),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_foreign_key_violation() {
    let (_guard, bridge, conn) = open_local("foreign_key");
    bridge.pragma(conn, "PRAGMA foreign_keys = ON").unwrap();
    bridge
        .execute_batch(
            conn,
            vec![
                ("CREATE TABLE users (id INTEGER PRIMARY KEY)".to_string(), vec![]),
                (
                    "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id))"
                        .to_string(),
                    vec![],
                ),
            ],
        )
        .unwrap();

    let err = bridge
        .execute(conn, "INSERT INTO posts (user_id) VALUES (42)", vec![])
        .unwrap_err();
    assert_sql_kind(&err, SqlErrorKind::ConstraintViolation);
}

#[test]
fn test_unique_violation_in_transaction_names_the_index() {
    let (_guard, bridge, conn) = open_local("unique_trx");
    bridge
        .execute(conn, "CREATE TABLE tags (name TEXT)", vec![])
        .unwrap();
    bridge
        .execute(conn, "CREATE UNIQUE INDEX tags_name_index ON tags (name)", vec![])
        .unwrap();

    let trx = bridge.begin(conn, TransactionBehavior::Immediate).unwrap();
    bridge
        .execute_in_transaction(conn, trx, "INSERT INTO tags VALUES ('rust')", vec![])
        .unwrap();
    let err = bridge
        .execute_in_transaction(conn, trx, "INSERT INTO tags VALUES ('rust')", vec![])
        .unwrap_err();
    match &err {
        BridgeError::Sql {
            kind: SqlErrorKind::ConstraintViolation,
            constraint,
            ..
        } => assert_eq!(constraint.as_deref(), Some("tags_name_index")),
        other => panic!("expected constraint violation, got {other:?}"),
    }
    assert!(err.to_string().contains("tags_name_index"), "{err}");

    // a failed statement does not end the transaction
    assert!(bridge.transaction_status(conn, trx).unwrap());
    bridge.rollback(conn, trx).unwrap();
}

// ============================================================================
// SYNTAX ERROR TESTS
// ============================================================================

#[test]
fn test_invalid_sql_syntax() {
    let (_guard, bridge, conn) = open_local("syntax");

    let err = bridge.query(conn, "SELEC * FRM nowhere", vec![]).unwrap_err();
    assert_sql_kind(&err, SqlErrorKind::Syntax);
}

#[test]
fn test_missing_table_and_column() {
    let (_guard, bridge, conn) = open_local("missing");
    bridge
        .execute(conn, "CREATE TABLE t (a INTEGER)", vec![])
        .unwrap();

    let err = bridge
        .query(conn, "SELECT * FROM no_such_table", vec![])
        .unwrap_err();
    assert_sql_kind(&err, SqlErrorKind::Syntax);

    let err = bridge.query(conn, "SELECT b FROM t", vec![]).unwrap_err();
    assert_sql_kind(&err, SqlErrorKind::Syntax);

    // the connection survives errors
    assert!(bridge.ping(conn).unwrap());
}

#[test]
fn test_cursor_declaration_error_leaves_no_cursor() {
    let (_guard, bridge, conn) = open_local("cursor_error");

    let err = bridge
        .declare_cursor(conn, "SELECT * FROM missing", vec![], 5)
        .unwrap_err();
    assert_eq!(err.kind(), "syntax");
    assert!(bridge.registries().cursors.is_empty().unwrap());
}

// ============================================================================
// CONFIGURATION ERROR TESTS
// ============================================================================

#[test]
fn test_connect_rejects_invalid_config_before_io() {
    let bridge = test_bridge();

    let mut missing_path = ConnectConfig::local("");
    missing_path.database = None;

    let configs = [
        ConnectConfig::local(""),
        missing_path,
        ConnectConfig::remote("not a uri", "token"),
        ConnectConfig::remote("ftp://example.com/db", "token"),
        ConnectConfig::remote("libsql://example.turso.io", ""),
        ConnectConfig::remote_replica("", "libsql://example.turso.io", "token"),
        ConnectConfig::local("/tmp/never-created.db").with_encryption_key("short"),
        ConnectConfig::remote("libsql://example.turso.io", "token")
            .with_encryption_key("0123456789abcdef0123456789abcdef"),
    ];
    for config in configs {
        let err = bridge.connect(config).unwrap_err();
        assert!(
            matches!(
                err,
                BridgeError::Connection {
                    kind: ConnectionErrorKind::InvalidConfig,
                    ..
                }
            ),
            "got {err:?}"
        );
    }
    assert_eq!(bridge.connection_count().unwrap(), 0);
}

#[test]
fn test_unopenable_database_is_an_io_error() {
    let bridge = test_bridge();

    let err = bridge
        .connect(ConnectConfig::local("/nonexistent-dir/deeper/db.sqlite"))
        .unwrap_err();
    assert_eq!(err.kind(), "io", "got {err:?}");
}

#[test]
fn test_bridge_requires_a_worker() {
    let err = Bridge::new(BridgeConfig {
        worker_threads: 0,
        ..BridgeConfig::default()
    })
    .unwrap_err();
    assert_eq!(err.kind(), "invalid_config");
}

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

#[test]
fn test_libsql_errors_are_classified_by_code() {
    let cases = [
        (19, "constraint_violation"),
        (2067, "constraint_violation"),
        (20, "type_mismatch"),
        (21, "misuse"),
        (25, "misuse"),
        (1, "syntax"),
        (8, "sql_error"),
        (5, "busy"),
        (6, "busy"),
    ];
    for (code, kind) in cases {
        let err = BridgeError::from_libsql(&libsql::Error::SqliteFailure(code, "boom".to_string()));
        assert_eq!(err.kind(), kind, "code {code}");
    }
}

#[test]
fn test_remote_errors_are_classified_by_message() {
    let err = BridgeError::from_libsql(&libsql::Error::Hrana(
        "SQLITE_CONSTRAINT: UNIQUE constraint failed: users.email".into(),
    ));
    assert_eq!(err.kind(), "constraint_violation");

    let err = BridgeError::from_libsql(&libsql::Error::Hrana("database is locked".into()));
    assert!(err.is_retryable());
}

#[test]
fn test_sync_errors_are_classified() {
    let err = BridgeError::from_sync(&libsql::Error::Replication(
        "replica diverged from primary".into(),
    ));
    assert_eq!(err.kind(), "sync_conflict");

    let err = BridgeError::from_sync(&libsql::Error::Replication("connection reset".into()));
    assert_eq!(err.kind(), "network_failure");
}

#[test]
fn test_only_busy_is_retryable() {
    assert!(BridgeError::Busy {
        message: "locked".to_string()
    }
    .is_retryable());
    assert!(!BridgeError::sql(SqlErrorKind::Syntax, "bad").is_retryable());
    assert!(!BridgeError::owner_closed("stmt-1").is_retryable());
}
