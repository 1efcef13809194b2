//! Integration tests for db-converse.

pub mod common;
pub mod concurrency_test;
pub mod postgres_test;
pub mod read_only_test;
pub mod scenarios_test;
