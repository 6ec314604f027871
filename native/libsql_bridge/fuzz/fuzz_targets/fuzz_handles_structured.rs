#![no_main]
//! Structured handle and savepoint-name fuzzing
//!
//! Starts from well-formed handles and damages them in targeted ways, so the
//! parsers see inputs close to the accepted format instead of random noise.
//! Savepoint names are checked against the identifier grammar they must
//! follow before being interpolated into SQL.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use libsql_bridge::utils::validate_savepoint_name;
use libsql_bridge::{ConnectionId, CursorId, Handle, StatementId, TransactionId};

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Kind {
    Connection,
    Transaction,
    Statement,
    Cursor,
}

impl Kind {
    fn allocate(self) -> String {
        match self {
            Kind::Connection => ConnectionId::allocate().to_string(),
            Kind::Transaction => TransactionId::allocate().to_string(),
            Kind::Statement => StatementId::allocate().to_string(),
            Kind::Cursor => CursorId::allocate().to_string(),
        }
    }
}

#[derive(Debug, Arbitrary)]
enum Damage<'a> {
    Untouched,
    Uppercase,
    Truncate(u8),
    Append(&'a str),
    Prepend(&'a str),
    SwapPrefix(Kind),
    Generation(u64),
    DropSeparator(u8),
}

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    kind: Kind,
    damage: Damage<'a>,
    savepoint: &'a str,
}

fn accepted(raw: &str) -> [bool; 4] {
    [
        raw.parse::<ConnectionId>().is_ok(),
        raw.parse::<TransactionId>().is_ok(),
        raw.parse::<StatementId>().is_ok(),
        raw.parse::<CursorId>().is_ok(),
    ]
}

fn damage(handle: &str, damage: &Damage<'_>) -> String {
    let (prefix, rest) = handle.split_once('-').unwrap_or((handle, ""));
    match damage {
        Damage::Untouched => handle.to_string(),
        Damage::Uppercase => handle.to_ascii_uppercase(),
        Damage::Truncate(at) => handle
            .char_indices()
            .nth(usize::from(*at))
            .map_or_else(|| handle.to_string(), |(i, _)| handle[..i].to_string()),
        Damage::Append(tail) => format!("{handle}{tail}"),
        Damage::Prepend(head) => format!("{head}{handle}"),
        Damage::SwapPrefix(kind) => {
            let other = kind.allocate();
            let other_prefix = other.split_once('-').map_or("", |(p, _)| p);
            format!("{other_prefix}-{rest}")
        }
        Damage::Generation(generation) => {
            let token = rest.split_once('-').map_or("", |(_, t)| t);
            format!("{prefix}-{generation:x}-{token}")
        }
        Damage::DropSeparator(nth) => {
            let dashes: Vec<usize> = handle.match_indices('-').map(|(i, _)| i).collect();
            match dashes.get(usize::from(*nth) % dashes.len().max(1)) {
                Some(&i) => format!("{}{}", &handle[..i], &handle[i + 1..]),
                None => handle.to_string(),
            }
        }
    }
}

fuzz_target!(|input: Input| {
    let handle = input.kind.allocate();
    let raw = damage(&handle, &input.damage);

    let accepted = accepted(&raw);
    assert!(accepted.iter().filter(|ok| **ok).count() <= 1, "{raw:?}");

    match input.damage {
        Damage::Untouched | Damage::Generation(_) => {
            assert!(accepted[input.kind as usize], "{raw:?}");
        }
        // prefixes are lowercase
        Damage::Uppercase => assert!(accepted.iter().all(|ok| !ok), "{raw:?}"),
        _ => {}
    }

    let name = input.savepoint;
    let is_identifier = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    assert_eq!(validate_savepoint_name(name).is_ok(), is_identifier, "{name:?}");
});
