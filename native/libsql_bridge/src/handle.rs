/// Handle allocation for registry-managed entities
///
/// Every connection, transaction, statement and cursor is addressed by an
/// opaque handle. A handle pairs a process-wide generation number with a random
/// v4 UUID: the generation never repeats within a process, and the UUID makes
/// live handles impossible to guess from stale ones.
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::BridgeError;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Raw handle shared by all typed ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    generation: u64,
    token: Uuid,
}

impl HandleId {
    /// Allocate a fresh handle.
    pub fn allocate() -> Self {
        Self {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            token: Uuid::new_v4(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn parse(raw: &str) -> Option<Self> {
        let (generation, token) = raw.split_once('-')?;
        let generation = u64::from_str_radix(generation, 16).ok()?;
        let token = Uuid::parse_str(token).ok()?;
        Some(Self { generation, token })
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}-{}", self.generation, self.token)
    }
}

/// Kind of entity a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Connection,
    Transaction,
    Statement,
    Cursor,
}

impl HandleKind {
    /// Prefix used in the string form of a handle.
    pub const fn prefix(self) -> &'static str {
        match self {
            HandleKind::Connection => "conn",
            HandleKind::Transaction => "trx",
            HandleKind::Statement => "stmt",
            HandleKind::Cursor => "cur",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::Connection => "connection",
            HandleKind::Transaction => "transaction",
            HandleKind::Statement => "statement",
            HandleKind::Cursor => "cursor",
        };
        f.write_str(name)
    }
}

/// Common behaviour of the typed handle wrappers.
pub trait Handle: Copy + Eq + std::hash::Hash + fmt::Display + Send + Sync + 'static {
    const KIND: HandleKind;

    fn from_raw(raw: HandleId) -> Self;

    fn raw(&self) -> HandleId;

    fn allocate() -> Self {
        Self::from_raw(HandleId::allocate())
    }
}

macro_rules! typed_handle {
    ($(#[$meta:meta])* $name:ident => $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(HandleId);

        impl Handle for $name {
            const KIND: HandleKind = $kind;

            fn from_raw(raw: HandleId) -> Self {
                Self(raw)
            }

            fn raw(&self) -> HandleId {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", <Self as Handle>::KIND.prefix(), self.0)
            }
        }

        impl FromStr for $name {
            type Err = BridgeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.strip_prefix(<Self as Handle>::KIND.prefix())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .and_then(HandleId::parse)
                    .map(Self)
                    .ok_or_else(|| BridgeError::unknown_handle(<Self as Handle>::KIND, s))
            }
        }
    };
}

typed_handle!(
    /// Handle of an open connection.
    ConnectionId => HandleKind::Connection
);
typed_handle!(
    /// Handle of an active transaction.
    TransactionId => HandleKind::Transaction
);
typed_handle!(
    /// Handle of a prepared statement.
    StatementId => HandleKind::Statement
);
typed_handle!(
    /// Handle of a declared cursor.
    CursorId => HandleKind::Cursor
);
