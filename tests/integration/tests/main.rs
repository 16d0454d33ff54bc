//! End-to-End Integration Tests
//!
//! These tests drive the connection manager and query engine against an
//! in-memory directory server.

mod common;
mod listing;
