//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for both store ports
//! - An in-memory store for tests and dry runs
//! - A keyword-based offline classification assistant

pub mod duckdb;
pub mod keyword;
pub mod memory;
