#![no_main]
//! Fuzz test for statement routing
//!
//! `should_use_query` and `detect_query_type` see caller-supplied SQL before
//! it reaches libsql, so they must handle all inputs without panicking.

use libfuzzer_sys::fuzz_target;
use libsql_bridge::{detect_query_type, should_use_query};

fuzz_target!(|data: &[u8]| {
    if let Ok(sql) = std::str::from_utf8(data) {
        let _ = should_use_query(sql);
        let _ = detect_query_type(sql);
    }
});
