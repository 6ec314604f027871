//! Unit and integration tests for libsql_bridge
//!
//! This module organizes all tests for the bridge into logical submodules
//! that correspond to the main library modules.

mod error_handling_tests;
mod integration_tests;
