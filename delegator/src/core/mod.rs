//! Deterministic, pure logic shared by the delegation engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (message logs, todo entries, plan text, file contents) and return
//! deterministic outputs suitable for tests.

pub mod anchors;
pub mod classify;
pub mod contract;
pub mod frontend;
pub mod preflight;
pub mod scope;
pub mod session;
pub mod signals;
pub mod todo;
pub mod types;
