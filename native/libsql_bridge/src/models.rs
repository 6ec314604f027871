/// Data structures shared across the bridge
///
/// This module defines the value and result types handed back to callers,
/// together with the enums that describe connection modes and transaction
/// locking behaviour.
use serde::{Deserialize, Serialize};

/// Connection mode enumeration
///
/// Determines how the connection is established and what capabilities are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Local SQLite database file
    Local,
    /// Direct connection to remote LibSQL/Turso server
    Remote,
    /// Local replica with remote sync
    RemoteReplica,
}

/// How eagerly a transaction acquires the write lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionBehavior {
    /// Acquire locks only when needed
    #[default]
    Deferred,
    /// Acquire the write lock at BEGIN
    Immediate,
    /// Block all other connections
    Exclusive,
    /// Read-only, no write lock
    ReadOnly,
}

impl From<TransactionBehavior> for libsql::TransactionBehavior {
    fn from(behavior: TransactionBehavior) -> Self {
        match behavior {
            TransactionBehavior::Deferred => libsql::TransactionBehavior::Deferred,
            TransactionBehavior::Immediate => libsql::TransactionBehavior::Immediate,
            TransactionBehavior::Exclusive => libsql::TransactionBehavior::Exclusive,
            TransactionBehavior::ReadOnly => libsql::TransactionBehavior::ReadOnly,
        }
    }
}

/// A single SQL value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<libsql::Value> for Value {
    fn from(value: libsql::Value) -> Self {
        match value {
            libsql::Value::Null => Value::Null,
            libsql::Value::Integer(v) => Value::Integer(v),
            libsql::Value::Real(v) => Value::Real(v),
            libsql::Value::Text(v) => Value::Text(v),
            libsql::Value::Blob(v) => Value::Blob(v),
        }
    }
}

impl From<Value> for libsql::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => libsql::Value::Null,
            Value::Integer(v) => libsql::Value::Integer(v),
            Value::Real(v) => libsql::Value::Real(v),
            Value::Text(v) => libsql::Value::Text(v),
            Value::Blob(v) => libsql::Value::Blob(v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Convert caller parameters into libsql values.
pub(crate) fn to_params(params: Vec<Value>) -> Vec<libsql::Value> {
    params.into_iter().map(Into::into).collect()
}

/// Columns and rows produced by a statement.
///
/// `num_rows` is the number of rows for row-producing statements and the
/// number of affected rows otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub num_rows: u64,
}

impl ResultSet {
    /// Result of a write that produced no rows.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            num_rows: rows_affected,
        }
    }
}

/// One batch of rows delivered by a cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub has_more: bool,
}

/// Outcome of a replica sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Frame number the replica reached, when the connection is a replica.
    pub frame_no: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Declared,
    Active,
    Exhausted,
}
