#![no_main]
//! Fuzz test for handle parsing
//!
//! Handle strings arrive from callers verbatim. Parsing must never panic, and
//! a string accepted as one kind of handle must be rejected as every other.

use libfuzzer_sys::fuzz_target;
use libsql_bridge::{ConnectionId, CursorId, StatementId, TransactionId};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    let accepted = [
        raw.parse::<ConnectionId>().is_ok(),
        raw.parse::<TransactionId>().is_ok(),
        raw.parse::<StatementId>().is_ok(),
        raw.parse::<CursorId>().is_ok(),
    ];
    assert!(accepted.iter().filter(|ok| **ok).count() <= 1, "{raw:?}");

    if let Ok(id) = raw.parse::<ConnectionId>() {
        assert_eq!(id.to_string().parse::<ConnectionId>().ok(), Some(id));
    }
});
