//! `LibSqlBridge`: handle registries and a sync bridge over `LibSQL`/Turso
//!
//! Synchronous callers address connections, transactions, prepared statements
//! and cursors through opaque, typed handles. Every operation checks that a
//! child handle belongs to the connection presenting it, then drives the async
//! libsql client to completion on a bounded worker pool.
//!
//! The same operations are exported to Elixir as NIFs (see [`nif`]).
pub mod batch;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod constants;
pub mod cursor;
pub mod decode;
pub mod error;
pub mod handle;
pub mod metadata;
pub mod models;
pub mod nif;
pub mod query;
pub mod registry;
pub mod replication;
pub mod savepoint;
pub mod statement;
pub mod transaction;
pub mod utils;

// Re-export key types and functions
pub use bridge::Bridge;
pub use config::{BridgeConfig, ConnectConfig};
pub use connection::ConnectionLease;
pub use error::{
    BridgeError, ConnectionErrorKind, NotFoundKind, OwnershipErrorKind, SqlErrorKind,
    SyncErrorKind,
};
pub use handle::{ConnectionId, CursorId, Handle, HandleKind, StatementId, TransactionId};
pub use models::*;
pub use utils::{detect_query_type, should_use_query, QueryType};

// Register all NIF functions with Erlang/Elixir
// Note: The rustler::init! macro automatically discovers all #[rustler::nif] functions
rustler::init!("Elixir.LibSqlBridge.Native");

#[cfg(test)]
mod tests;
