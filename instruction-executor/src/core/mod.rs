//! Deterministic, pure logic shared by the server.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests. The
//! only clock they read is an `Instant` passed in by the caller.

pub mod classifier;
pub mod interruption;
pub mod patterns;
pub mod state;
pub mod types;
