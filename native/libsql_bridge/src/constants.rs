/// Global constants and atom declarations for LibSqlBridge
///
/// This module holds the static defaults used by the bridge and the atoms
/// used as return values and option identifiers on the NIF interface.
use rustler::atoms;

/// Default timeout for replica sync operations (in seconds)
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 30;

/// Default timeout for establishing a connection (in seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default busy timeout applied to new connections (in milliseconds)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default size of the bridge worker pool
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Minimum length of an encryption-at-rest key
pub const MIN_ENCRYPTION_KEY_LEN: usize = 32;

/// Tombstones kept per handle registry for children of closed connections
pub const MAX_ORPHANED_HANDLES: usize = 1_024;

/// First and maximum delay between busy retries (in milliseconds)
pub const BUSY_RETRY_INITIAL_MS: u64 = 5;
pub const BUSY_RETRY_MAX_MS: u64 = 100;

// Atom declarations - used as return values, option identifiers and error kinds
atoms! {
    local,
    remote,
    remote_replica,
    ok,
    error,
    nil,
    conn_id,
    trx_id,
    stmt_id,
    cursor_id,
    deferred,
    immediate,
    exclusive,
    read_only,
    transaction,
    connection,
    blob,
    // connect options
    database,
    uri,
    auth_token,
    encryption_key,
    busy_timeout,
    // error kinds
    io,
    auth,
    invalid_config,
    syntax,
    constraint_violation,
    type_mismatch,
    misuse,
    sql_error,
    owner_mismatch,
    owner_closed,
    not_found,
    busy,
    network_failure,
    sync_conflict,
    sync_timeout,
    already_in_transaction,
    out_of_range,
    invalid_argument,
    runtime,
}
