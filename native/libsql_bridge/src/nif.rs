/// Erlang/Elixir boundary
///
/// Every NIF runs on a dirty IO scheduler, decodes its arguments, calls the
/// process-wide [`Bridge`] and encodes the result. Handles cross the boundary
/// as strings; errors as `{kind, message}` where `kind` is the atom named by
/// [`BridgeError::kind`].
///
/// `connect` also hands back a resource owning the connection, so a
/// connection whose Elixir owner dies without closing it is reclaimed when
/// the resource is garbage collected.
use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::OnceCell;
use rustler::types::atom::{nil, ok};
use rustler::{Atom, Binary, Encoder, Env, NifResult, OwnedBinary, Resource, ResourceArc, Term};

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::connection::ConnectionLease;
use crate::constants::*;
use crate::decode::{
    decode_batch, decode_connect_config, decode_handle, decode_params,
    decode_transaction_behavior,
};
use crate::error::BridgeError;
use crate::handle::{ConnectionId, CursorId, StatementId, TransactionId};
use crate::models::{FetchBatch, ResultSet, Value};

static BRIDGE: OnceCell<Bridge> = OnceCell::new();

fn bridge() -> Result<&'static Bridge, BridgeError> {
    BRIDGE.get_or_try_init(|| Bridge::new(BridgeConfig::default()))
}

/// Connection owned by the VM's garbage collector.
pub struct ConnectionResource {
    lease: ConnectionLease,
}

impl ConnectionResource {
    pub fn id(&self) -> ConnectionId {
        self.lease.id()
    }
}

#[rustler::resource_impl]
impl Resource for ConnectionResource {}

fn error_atom(err: &BridgeError) -> Atom {
    match err.kind() {
        "io" => io(),
        "auth" => auth(),
        "invalid_config" => invalid_config(),
        "syntax" => syntax(),
        "constraint_violation" => constraint_violation(),
        "type_mismatch" => type_mismatch(),
        "misuse" => misuse(),
        "owner_mismatch" => owner_mismatch(),
        "owner_closed" => owner_closed(),
        "not_found" => not_found(),
        "busy" => busy(),
        "network_failure" => network_failure(),
        "sync_conflict" => sync_conflict(),
        "sync_timeout" => sync_timeout(),
        "already_in_transaction" => already_in_transaction(),
        "out_of_range" => out_of_range(),
        "invalid_argument" => invalid_argument(),
        "runtime" => runtime(),
        _ => sql_error(),
    }
}

fn to_nif_error(err: BridgeError) -> rustler::Error {
    rustler::Error::Term(Box::new((error_atom(&err), err.to_string())))
}

/// Run an operation against the process-wide bridge.
fn with_bridge<T>(op: impl FnOnce(&Bridge) -> Result<T, BridgeError>) -> NifResult<T> {
    bridge().and_then(op).map_err(to_nif_error)
}

fn conn(raw: &str) -> NifResult<ConnectionId> {
    decode_handle(raw).map_err(to_nif_error)
}

fn trx(raw: &str) -> NifResult<TransactionId> {
    decode_handle(raw).map_err(to_nif_error)
}

fn stmt(raw: &str) -> NifResult<StatementId> {
    decode_handle(raw).map_err(to_nif_error)
}

fn cursor(raw: &str) -> NifResult<CursorId> {
    decode_handle(raw).map_err(to_nif_error)
}

fn params(args: Vec<Term>) -> NifResult<Vec<Value>> {
    decode_params(args).map_err(to_nif_error)
}

fn encode_value<'a>(env: Env<'a>, value: &Value) -> NifResult<Term<'a>> {
    Ok(match value {
        Value::Null => nil().encode(env),
        Value::Integer(v) => v.encode(env),
        Value::Real(v) => v.encode(env),
        Value::Text(v) => v.encode(env),
        Value::Blob(v) => {
            let mut owned = OwnedBinary::new(v.len()).ok_or_else(|| {
                rustler::Error::Term(Box::new((
                    runtime(),
                    format!("Failed to allocate binary of {} bytes", v.len()),
                )))
            })?;
            owned.as_mut_slice().copy_from_slice(v);
            Binary::from_owned(owned, env).encode(env)
        }
    })
}

fn encode_rows<'a>(env: Env<'a>, rows: &[Vec<Value>]) -> NifResult<Vec<Term<'a>>> {
    rows.iter()
        .map(|row| {
            let terms = row
                .iter()
                .map(|value| encode_value(env, value))
                .collect::<NifResult<Vec<Term<'a>>>>()?;
            Ok(terms.encode(env))
        })
        .collect()
}

/// Encode a result set as `%{"columns" => _, "rows" => _, "num_rows" => _}`.
fn encode_result_set<'a>(env: Env<'a>, result: &ResultSet) -> NifResult<Term<'a>> {
    let mut map: HashMap<&str, Term<'a>> = HashMap::with_capacity(3);
    map.insert("columns", result.columns.encode(env));
    map.insert("rows", encode_rows(env, &result.rows)?.encode(env));
    map.insert("num_rows", result.num_rows.encode(env));
    Ok(map.encode(env))
}

fn encode_fetch<'a>(env: Env<'a>, batch: &FetchBatch) -> NifResult<Term<'a>> {
    Ok((batch.columns.clone(), encode_rows(env, &batch.rows)?, batch.has_more).encode(env))
}

// Connections

/// Open a connection from a keyword list of options and a mode atom.
///
/// Returns `{conn_id, resource}`; dropping the last reference to the resource
/// closes the connection.
#[rustler::nif(schedule = "DirtyIo")]
pub fn connect(opts: Term, mode: Atom) -> NifResult<(String, ResourceArc<ConnectionResource>)> {
    let config = decode_connect_config(opts, mode).map_err(to_nif_error)?;
    let lease = with_bridge(|bridge| bridge.lease(config))?;
    let id = lease.id().to_string();
    Ok((id, ResourceArc::new(ConnectionResource { lease })))
}

/// Close a connection, transaction, statement or cursor.
///
/// `opt` names the kind of `id`: `:conn_id`, `:trx_id`, `:stmt_id` or
/// `:cursor_id`. Closing something already closed is `:ok`.
#[rustler::nif(schedule = "DirtyIo")]
pub fn close(conn_id: &str, id: &str, opt: Atom) -> NifResult<Atom> {
    let owner = conn(conn_id)?;
    if opt == crate::constants::conn_id() {
        let id = conn(id)?;
        with_bridge(|bridge| bridge.close_connection(id))?;
    } else if opt == crate::constants::trx_id() {
        let id = trx(id)?;
        with_bridge(|bridge| bridge.close_transaction(owner, id))?;
    } else if opt == crate::constants::stmt_id() {
        let id = stmt(id)?;
        with_bridge(|bridge| bridge.close_statement(owner, id))?;
    } else if opt == crate::constants::cursor_id() {
        let id = cursor(id)?;
        with_bridge(|bridge| bridge.close_cursor(owner, id))?;
    } else {
        return Err(to_nif_error(BridgeError::InvalidArgument(format!(
            "unknown handle kind {opt:?}"
        ))));
    }
    Ok(ok())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn ping(conn_id: &str) -> NifResult<bool> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.ping(conn_id))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn set_busy_timeout(conn_id: &str, timeout_ms: u64) -> NifResult<Atom> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.set_busy_timeout(conn_id, Duration::from_millis(timeout_ms)))?;
    Ok(ok())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn reset_connection(conn_id: &str) -> NifResult<Atom> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.reset_connection(conn_id))?;
    Ok(ok())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn interrupt_connection(conn_id: &str) -> NifResult<Atom> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.interrupt_connection(conn_id))?;
    Ok(ok())
}

// Queries

#[rustler::nif(schedule = "DirtyIo")]
pub fn query_args<'a>(env: Env<'a>, conn_id: &str, query: &str, args: Vec<Term<'a>>) -> NifResult<Term<'a>> {
    let conn_id = conn(conn_id)?;
    let args = params(args)?;
    let result = with_bridge(|bridge| bridge.query(conn_id, query, args))?;
    encode_result_set(env, &result)
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn pragma_query<'a>(env: Env<'a>, conn_id: &str, pragma_stmt: &str) -> NifResult<Term<'a>> {
    let conn_id = conn(conn_id)?;
    let result = with_bridge(|bridge| bridge.pragma(conn_id, pragma_stmt))?;
    encode_result_set(env, &result)
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn execute_batch<'a>(env: Env<'a>, conn_id: &str, statements: Vec<Term<'a>>) -> NifResult<Term<'a>> {
    let conn_id = conn(conn_id)?;
    let batch = decode_batch(statements).map_err(to_nif_error)?;
    let results = with_bridge(|bridge| bridge.execute_batch(conn_id, batch))?;
    results
        .iter()
        .map(|result| encode_result_set(env, result))
        .collect::<NifResult<Vec<Term<'a>>>>()
        .map(|terms| terms.encode(env))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn execute_transactional_batch<'a>(
    env: Env<'a>,
    conn_id: &str,
    statements: Vec<Term<'a>>,
) -> NifResult<Term<'a>> {
    let conn_id = conn(conn_id)?;
    let batch = decode_batch(statements).map_err(to_nif_error)?;
    let results = with_bridge(|bridge| bridge.execute_transactional_batch(conn_id, batch))?;
    results
        .iter()
        .map(|result| encode_result_set(env, result))
        .collect::<NifResult<Vec<Term<'a>>>>()
        .map(|terms| terms.encode(env))
}

// Transactions

#[rustler::nif(schedule = "DirtyIo")]
pub fn begin_transaction(conn_id: &str, behavior: Atom) -> NifResult<String> {
    let conn_id = conn(conn_id)?;
    let behavior = decode_transaction_behavior(behavior).ok_or_else(|| {
        to_nif_error(BridgeError::InvalidArgument(format!(
            "unknown transaction behavior {behavior:?}"
        )))
    })?;
    with_bridge(|bridge| bridge.begin(conn_id, behavior)).map(|id| id.to_string())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn execute_with_transaction<'a>(
    conn_id: &str,
    trx_id: &str,
    query: &str,
    args: Vec<Term<'a>>,
) -> NifResult<u64> {
    let (conn_id, trx_id) = (conn(conn_id)?, trx(trx_id)?);
    let args = params(args)?;
    with_bridge(|bridge| bridge.execute_in_transaction(conn_id, trx_id, query, args))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn query_with_trx_args<'a>(
    env: Env<'a>,
    conn_id: &str,
    trx_id: &str,
    query: &str,
    args: Vec<Term<'a>>,
) -> NifResult<Term<'a>> {
    let (conn_id, trx_id) = (conn(conn_id)?, trx(trx_id)?);
    let args = params(args)?;
    let result = with_bridge(|bridge| bridge.query_in_transaction(conn_id, trx_id, query, args))?;
    encode_result_set(env, &result)
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn commit_transaction(conn_id: &str, trx_id: &str) -> NifResult<Atom> {
    let (conn_id, trx_id) = (conn(conn_id)?, trx(trx_id)?);
    with_bridge(|bridge| bridge.commit(conn_id, trx_id))?;
    Ok(ok())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn rollback_transaction(conn_id: &str, trx_id: &str) -> NifResult<Atom> {
    let (conn_id, trx_id) = (conn(conn_id)?, trx(trx_id)?);
    with_bridge(|bridge| bridge.rollback(conn_id, trx_id))?;
    Ok(ok())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn transaction_status(conn_id: &str, trx_id: &str) -> NifResult<bool> {
    let (conn_id, trx_id) = (conn(conn_id)?, trx(trx_id)?);
    with_bridge(|bridge| bridge.transaction_status(conn_id, trx_id))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn savepoint(conn_id: &str, trx_id: &str, name: &str) -> NifResult<Atom> {
    let (conn_id, trx_id) = (conn(conn_id)?, trx(trx_id)?);
    with_bridge(|bridge| bridge.savepoint(conn_id, trx_id, name))?;
    Ok(ok())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn release_savepoint(conn_id: &str, trx_id: &str, name: &str) -> NifResult<Atom> {
    let (conn_id, trx_id) = (conn(conn_id)?, trx(trx_id)?);
    with_bridge(|bridge| bridge.release_savepoint(conn_id, trx_id, name))?;
    Ok(ok())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn rollback_to_savepoint(conn_id: &str, trx_id: &str, name: &str) -> NifResult<Atom> {
    let (conn_id, trx_id) = (conn(conn_id)?, trx(trx_id)?);
    with_bridge(|bridge| bridge.rollback_to_savepoint(conn_id, trx_id, name))?;
    Ok(ok())
}

// Prepared statements

#[rustler::nif(schedule = "DirtyIo")]
pub fn prepare_statement(conn_id: &str, sql: &str) -> NifResult<String> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.prepare(conn_id, sql)).map(|id| id.to_string())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn execute_prepared<'a>(conn_id: &str, stmt_id: &str, args: Vec<Term<'a>>) -> NifResult<u64> {
    let (conn_id, stmt_id) = (conn(conn_id)?, stmt(stmt_id)?);
    let args = params(args)?;
    with_bridge(|bridge| bridge.execute_statement(conn_id, stmt_id, args))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn query_prepared<'a>(
    env: Env<'a>,
    conn_id: &str,
    stmt_id: &str,
    args: Vec<Term<'a>>,
) -> NifResult<Term<'a>> {
    let (conn_id, stmt_id) = (conn(conn_id)?, stmt(stmt_id)?);
    let args = params(args)?;
    let result = with_bridge(|bridge| bridge.query_statement(conn_id, stmt_id, args))?;
    encode_result_set(env, &result)
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn statement_column_count(conn_id: &str, stmt_id: &str) -> NifResult<usize> {
    let (conn_id, stmt_id) = (conn(conn_id)?, stmt(stmt_id)?);
    with_bridge(|bridge| bridge.statement_column_count(conn_id, stmt_id))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn statement_column_name(conn_id: &str, stmt_id: &str, idx: usize) -> NifResult<String> {
    let (conn_id, stmt_id) = (conn(conn_id)?, stmt(stmt_id)?);
    with_bridge(|bridge| bridge.statement_column_name(conn_id, stmt_id, idx))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn statement_parameter_count(conn_id: &str, stmt_id: &str) -> NifResult<usize> {
    let (conn_id, stmt_id) = (conn(conn_id)?, stmt(stmt_id)?);
    with_bridge(|bridge| bridge.statement_parameter_count(conn_id, stmt_id))
}

// Cursors

#[rustler::nif(schedule = "DirtyIo")]
pub fn declare_cursor<'a>(conn_id: &str, sql: &str, args: Vec<Term<'a>>, batch_size: usize) -> NifResult<String> {
    let conn_id = conn(conn_id)?;
    let args = params(args)?;
    with_bridge(|bridge| bridge.declare_cursor(conn_id, sql, args, batch_size)).map(|id| id.to_string())
}

/// Declare a cursor on a connection (`:connection`) or inside a transaction
/// (`:transaction`).
#[rustler::nif(schedule = "DirtyIo")]
pub fn declare_cursor_with_context<'a>(
    conn_id: &str,
    id: &str,
    id_type: Atom,
    sql: &str,
    args: Vec<Term<'a>>,
    batch_size: usize,
) -> NifResult<String> {
    let owner = conn(conn_id)?;
    let args = params(args)?;

    let cursor_id = if id_type == transaction() {
        let trx_id = trx(id)?;
        with_bridge(|bridge| bridge.declare_cursor_in_transaction(owner, trx_id, sql, args, batch_size))?
    } else if id_type == connection() {
        if conn(id)? != owner {
            return Err(to_nif_error(BridgeError::owner_mismatch(id)));
        }
        with_bridge(|bridge| bridge.declare_cursor(owner, sql, args, batch_size))?
    } else {
        return Err(to_nif_error(BridgeError::InvalidArgument(format!(
            "invalid id_type for cursor: {id_type:?}"
        ))));
    };
    Ok(cursor_id.to_string())
}

/// Fetch the next batch as `{columns, rows, has_more}`.
#[rustler::nif(schedule = "DirtyIo")]
pub fn fetch_cursor<'a>(env: Env<'a>, conn_id: &str, cursor_id: &str) -> NifResult<Term<'a>> {
    let (conn_id, cursor_id) = (conn(conn_id)?, cursor(cursor_id)?);
    let batch = with_bridge(|bridge| bridge.fetch(conn_id, cursor_id))?;
    encode_fetch(env, &batch)
}

// Metadata

#[rustler::nif(schedule = "DirtyIo")]
pub fn last_insert_rowid(conn_id: &str) -> NifResult<i64> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.last_insert_rowid(conn_id))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn changes(conn_id: &str) -> NifResult<u64> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.changes(conn_id))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn total_changes(conn_id: &str) -> NifResult<u64> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.total_changes(conn_id))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn is_autocommit(conn_id: &str) -> NifResult<bool> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.is_autocommit(conn_id))
}

// Replication

/// Sync a replica; returns `{:ok, frame_no | nil}`.
#[rustler::nif(schedule = "DirtyIo")]
pub fn do_sync<'a>(env: Env<'a>, conn_id: &str) -> NifResult<Term<'a>> {
    let conn_id = conn(conn_id)?;
    let outcome = with_bridge(|bridge| bridge.sync(conn_id))?;
    Ok(match outcome.frame_no {
        Some(frame_no) => (ok(), frame_no).encode(env),
        None => (ok(), nil()).encode(env),
    })
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn get_frame_number(conn_id: &str) -> NifResult<u64> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.frame_number(conn_id))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn sync_until(conn_id: &str, frame_no: u64) -> NifResult<Atom> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.sync_until(conn_id, frame_no))?;
    Ok(ok())
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn flush_replicator(conn_id: &str) -> NifResult<u64> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.flush_replicator(conn_id))
}

#[rustler::nif(schedule = "DirtyIo")]
pub fn max_write_replication_index(conn_id: &str) -> NifResult<u64> {
    let conn_id = conn(conn_id)?;
    with_bridge(|bridge| bridge.max_write_replication_index(conn_id))
}
