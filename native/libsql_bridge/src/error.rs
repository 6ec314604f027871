/// Error taxonomy surfaced across the bridge boundary
///
/// Every public operation returns `Result<_, BridgeError>`. Errors carry a
/// stable kind (see [`BridgeError::kind`]) plus a human readable message so
/// callers can build higher-level semantics on top, e.g. mapping a constraint
/// violation to a field error.
use std::fmt;
use thiserror::Error;

use crate::handle::HandleKind;

/// SQLite primary result codes the classifier cares about.
mod codes {
    pub const ERROR: i32 = 1;
    pub const AUTH: i32 = 23;
    pub const BUSY: i32 = 5;
    pub const LOCKED: i32 = 6;
    pub const CANTOPEN: i32 = 14;
    pub const IOERR: i32 = 10;
    pub const NOTADB: i32 = 26;
    pub const CONSTRAINT: i32 = 19;
    pub const MISMATCH: i32 = 20;
    pub const MISUSE: i32 = 21;
    pub const RANGE: i32 = 25;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    Io,
    Auth,
    InvalidConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlErrorKind {
    Syntax,
    ConstraintViolation,
    TypeMismatch,
    /// Wrong binding arity, out-of-range parameter index and similar API misuse.
    Misuse,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipErrorKind {
    OwnerMismatch,
    OwnerClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    UnknownHandle,
    UnknownSavepoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    NetworkFailure,
    Conflict,
    Timeout,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("connection error ({kind:?}): {message}")]
    Connection {
        kind: ConnectionErrorKind,
        message: String,
    },

    #[error("{}", sql_display(.kind, .message, .constraint.as_deref()))]
    Sql {
        kind: SqlErrorKind,
        message: String,
        constraint: Option<String>,
    },

    #[error("{} {handle}", ownership_display(.kind))]
    Ownership {
        kind: OwnershipErrorKind,
        handle: String,
    },

    #[error("{} not found: {handle}", not_found_display(.kind))]
    NotFound { kind: NotFoundKind, handle: String },

    #[error("database is busy: {message}")]
    Busy { message: String },

    #[error("sync error ({kind:?}): {message}")]
    Sync { kind: SyncErrorKind, message: String },

    #[error("connection {connection} already has an active transaction {transaction}")]
    AlreadyInTransaction {
        connection: String,
        transaction: String,
    },

    #[error("column index {index} out of bounds (statement has {len} columns)")]
    OutOfRange { index: usize, len: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

fn sql_display(kind: &SqlErrorKind, message: &str, constraint: Option<&str>) -> String {
    match constraint {
        Some(index) => format!("sql error ({kind:?}): {message} (index: {index})"),
        None => format!("sql error ({kind:?}): {message}"),
    }
}

fn ownership_display(kind: &OwnershipErrorKind) -> &'static str {
    match kind {
        OwnershipErrorKind::OwnerMismatch => "handle does not belong to this connection:",
        OwnershipErrorKind::OwnerClosed => "owning connection was closed for",
    }
}

fn not_found_display(kind: &NotFoundKind) -> &'static str {
    match kind {
        NotFoundKind::UnknownHandle => "handle",
        NotFoundKind::UnknownSavepoint => "savepoint",
    }
}

impl BridgeError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        BridgeError::Connection {
            kind: ConnectionErrorKind::InvalidConfig,
            message: message.into(),
        }
    }

    pub fn unknown_handle(kind: HandleKind, handle: impl fmt::Display) -> Self {
        BridgeError::NotFound {
            kind: NotFoundKind::UnknownHandle,
            handle: format!("{kind} {handle}"),
        }
    }

    pub fn unknown_savepoint(name: &str) -> Self {
        BridgeError::NotFound {
            kind: NotFoundKind::UnknownSavepoint,
            handle: name.to_string(),
        }
    }

    pub fn owner_mismatch(handle: impl fmt::Display) -> Self {
        BridgeError::Ownership {
            kind: OwnershipErrorKind::OwnerMismatch,
            handle: handle.to_string(),
        }
    }

    pub fn owner_closed(handle: impl fmt::Display) -> Self {
        BridgeError::Ownership {
            kind: OwnershipErrorKind::OwnerClosed,
            handle: handle.to_string(),
        }
    }

    pub fn sql(kind: SqlErrorKind, message: impl Into<String>) -> Self {
        BridgeError::Sql {
            kind,
            message: message.into(),
            constraint: None,
        }
    }

    /// Stable snake_case name of the error kind.
    ///
    /// Used as the error atom on the NIF boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Connection { kind, .. } => match kind {
                ConnectionErrorKind::Io => "io",
                ConnectionErrorKind::Auth => "auth",
                ConnectionErrorKind::InvalidConfig => "invalid_config",
            },
            BridgeError::Sql { kind, .. } => match kind {
                SqlErrorKind::Syntax => "syntax",
                SqlErrorKind::ConstraintViolation => "constraint_violation",
                SqlErrorKind::TypeMismatch => "type_mismatch",
                SqlErrorKind::Misuse => "misuse",
                SqlErrorKind::Other => "sql_error",
            },
            BridgeError::Ownership { kind, .. } => match kind {
                OwnershipErrorKind::OwnerMismatch => "owner_mismatch",
                OwnershipErrorKind::OwnerClosed => "owner_closed",
            },
            BridgeError::NotFound { .. } => "not_found",
            BridgeError::Busy { .. } => "busy",
            BridgeError::Sync { kind, .. } => match kind {
                SyncErrorKind::NetworkFailure => "network_failure",
                SyncErrorKind::Conflict => "sync_conflict",
                SyncErrorKind::Timeout => "sync_timeout",
            },
            BridgeError::AlreadyInTransaction { .. } => "already_in_transaction",
            BridgeError::OutOfRange { .. } => "out_of_range",
            BridgeError::InvalidArgument(_) => "invalid_argument",
            BridgeError::Runtime(_) => "runtime",
        }
    }

    /// Only lock contention is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Busy { .. })
    }

    /// Classify an error returned while opening a database.
    pub fn from_connect(err: &libsql::Error) -> Self {
        let message = err.to_string();
        let kind = match primary_code(err) {
            Some(codes::AUTH) => ConnectionErrorKind::Auth,
            Some(codes::CANTOPEN | codes::IOERR | codes::NOTADB) => ConnectionErrorKind::Io,
            _ if looks_like_auth_failure(&message) => ConnectionErrorKind::Auth,
            _ => ConnectionErrorKind::Io,
        };
        BridgeError::Connection { kind, message }
    }

    /// Classify an error returned by a statement.
    pub fn from_libsql(err: &libsql::Error) -> Self {
        let message = err.to_string();
        if is_busy(err) {
            return BridgeError::Busy { message };
        }
        let kind = match primary_code(err) {
            Some(codes::CONSTRAINT) => SqlErrorKind::ConstraintViolation,
            Some(codes::MISMATCH) => SqlErrorKind::TypeMismatch,
            Some(codes::MISUSE | codes::RANGE) => SqlErrorKind::Misuse,
            Some(codes::ERROR) => SqlErrorKind::Syntax,
            Some(_) => SqlErrorKind::Other,
            None => classify_message(&message),
        };
        BridgeError::sql(kind, message)
    }

    /// Classify an error returned by a replica sync.
    pub fn from_sync(err: &libsql::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_ascii_lowercase();
        let kind = if lowered.contains("conflict") || lowered.contains("diverge") {
            SyncErrorKind::Conflict
        } else {
            SyncErrorKind::NetworkFailure
        };
        BridgeError::Sync { kind, message }
    }

    /// Attach the name of the violated index to a constraint error.
    pub fn with_constraint(self, index: Option<String>) -> Self {
        match self {
            BridgeError::Sql {
                kind, message, ..
            } => BridgeError::Sql {
                kind,
                message,
                constraint: index,
            },
            other => other,
        }
    }
}

/// Whether libsql reported lock contention.
pub fn is_busy(err: &libsql::Error) -> bool {
    match primary_code(err) {
        Some(code) => code == codes::BUSY || code == codes::LOCKED,
        None => {
            let lowered = err.to_string().to_ascii_lowercase();
            lowered.contains("database is locked") || lowered.contains("sqlite_busy")
        }
    }
}

fn primary_code(err: &libsql::Error) -> Option<i32> {
    match err {
        libsql::Error::SqliteFailure(code, _) => Some(code & 0xff),
        _ => None,
    }
}

fn looks_like_auth_failure(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("401")
        || lowered.contains("403")
        || lowered.contains("unauthorized")
        || lowered.contains("auth")
        || lowered.contains("jwt")
}

/// Remote (Hrana) errors arrive as text only.
fn classify_message(message: &str) -> SqlErrorKind {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("constraint failed") {
        SqlErrorKind::ConstraintViolation
    } else if lowered.contains("datatype mismatch") {
        SqlErrorKind::TypeMismatch
    } else if lowered.contains("syntax error")
        || lowered.contains("no such table")
        || lowered.contains("no such column")
    {
        SqlErrorKind::Syntax
    } else {
        SqlErrorKind::Other
    }
}
