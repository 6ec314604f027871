/// Decoding and type conversion utilities
///
/// This module converts Elixir terms into the bridge's Rust types: atoms into
/// modes and transaction behaviours, keyword lists into connection configs,
/// terms into SQL values and handle strings into typed ids.
use std::str::FromStr;

use rustler::{Atom, Binary, Term};

use crate::config::ConnectConfig;
use crate::constants::{
    auth_token, blob, busy_timeout, database, deferred, encryption_key, exclusive, immediate,
    local, nil, read_only, remote, remote_replica, uri, DEFAULT_BUSY_TIMEOUT_MS,
};
use crate::error::BridgeError;
use crate::handle::Handle;
use crate::models::{Mode, TransactionBehavior, Value};

/// Decode an Elixir atom to a Mode enum
///
/// Converts atoms like `:local`, `:remote`, `:remote_replica` to their Rust equivalents.
pub fn decode_mode(atom: Atom) -> Option<Mode> {
    if atom == remote_replica() {
        Some(Mode::RemoteReplica)
    } else if atom == remote() {
        Some(Mode::Remote)
    } else if atom == local() {
        Some(Mode::Local)
    } else {
        None
    }
}

/// Decode an Elixir atom to a TransactionBehavior
///
/// Converts atoms like `:deferred`, `:immediate`, `:exclusive`, `:read_only`.
pub fn decode_transaction_behavior(atom: Atom) -> Option<TransactionBehavior> {
    if atom == deferred() {
        Some(TransactionBehavior::Deferred)
    } else if atom == immediate() {
        Some(TransactionBehavior::Immediate)
    } else if atom == exclusive() {
        Some(TransactionBehavior::Exclusive)
    } else if atom == read_only() {
        Some(TransactionBehavior::ReadOnly)
    } else {
        None
    }
}

/// Parse a handle string of kind `H`.
///
/// A malformed string, or a handle of another kind, is reported as an
/// unknown handle.
pub fn decode_handle<H>(raw: &str) -> Result<H, BridgeError>
where
    H: Handle + FromStr<Err = BridgeError>,
{
    raw.parse()
}

/// Build a [`ConnectConfig`] from a keyword list and a mode atom.
///
/// Recognised keys: `database`, `uri`, `auth_token`, `encryption_key`,
/// `busy_timeout` (milliseconds). Unknown keys are ignored.
pub fn decode_connect_config(opts: Term, mode: Atom) -> Result<ConnectConfig, BridgeError> {
    let mode = decode_mode(mode)
        .ok_or_else(|| BridgeError::invalid_config(format!("unknown mode {mode:?}")))?;

    let list: Vec<(Atom, Term)> = opts
        .decode()
        .map_err(|e| BridgeError::invalid_config(format!("expected keyword list: {e:?}")))?;

    let mut config = ConnectConfig {
        mode,
        database: None,
        uri: None,
        auth_token: None,
        busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        encryption_key: None,
    };

    for (key, value) in list {
        let text = || value.decode::<String>().ok();
        if key == database() {
            config.database = text();
        } else if key == uri() {
            config.uri = text();
        } else if key == auth_token() {
            config.auth_token = text();
        } else if key == encryption_key() {
            config.encryption_key = text();
        } else if key == busy_timeout() {
            config.busy_timeout_ms = value.decode::<u64>().map_err(|_| {
                BridgeError::invalid_config("`busy_timeout` must be a non-negative integer")
            })?;
        }
    }

    Ok(config)
}

/// Decode an Elixir term to a SQL value
///
/// Supports integers, floats, booleans, strings, blobs, nil and binary data.
pub fn decode_value(term: Term) -> Result<Value, BridgeError> {
    // nil is an atom, like true and false; check it before booleans
    if let Ok(atom) = term.decode::<Atom>() {
        if atom == nil() {
            return Ok(Value::Null);
        }
    }

    if let Ok(v) = term.decode::<i64>() {
        Ok(Value::Integer(v))
    } else if let Ok(v) = term.decode::<f64>() {
        Ok(Value::Real(v))
    } else if let Ok(v) = term.decode::<bool>() {
        Ok(Value::from(v))
    } else if let Ok(v) = term.decode::<String>() {
        Ok(Value::Text(v))
    } else if let Ok((atom, data)) = term.decode::<(Atom, Binary)>() {
        // {:blob, data} marks binaries that are not UTF-8 text
        if atom == blob() {
            Ok(Value::Blob(data.as_slice().to_vec()))
        } else {
            Err(BridgeError::sql(
                crate::error::SqlErrorKind::TypeMismatch,
                format!("unsupported tagged value {atom:?}"),
            ))
        }
    } else if let Ok(v) = term.decode::<Binary>() {
        Ok(Value::Blob(v.as_slice().to_vec()))
    } else {
        Err(BridgeError::sql(
            crate::error::SqlErrorKind::TypeMismatch,
            format!("unsupported argument type: {term:?}"),
        ))
    }
}

/// Decode a list of parameter terms.
pub fn decode_params(args: Vec<Term>) -> Result<Vec<Value>, BridgeError> {
    args.into_iter().map(decode_value).collect()
}

/// Decode `[{sql, params}]` batch entries.
pub fn decode_batch(statements: Vec<Term>) -> Result<Vec<(String, Vec<Value>)>, BridgeError> {
    statements
        .into_iter()
        .map(|stmt| {
            let (sql, args): (String, Vec<Term>) = stmt.decode().map_err(|e| {
                BridgeError::InvalidArgument(format!("failed to decode statement: {e:?}"))
            })?;
            Ok((sql, decode_params(args)?))
        })
        .collect()
}
