//! I/O adapters for the server.

pub mod config;
pub mod diagnostic_log;
pub mod handoff;
pub mod prompt;
pub mod relay;
pub mod step_source;
