//! Line-delimited JSON-RPC server for stepwise instruction execution.
//!
//! The server reads one request per line on stdin, drives an execution state
//! machine over an externally supplied step list, and writes one response per
//! request on stdout. Step outputs are scanned for blocking questions, which
//! are either auto-confirmed or surfaced to a bot relay.
//!
//! - **[`core`]**: Pure, deterministic logic (classification, interruption
//!   policy, execution state). No I/O.
//! - **[`io`]**: Side-effecting adapters (config, step source, prompts,
//!   diagnostic log, step hand-off, bot relay).
//!
//! [`server`] ties them together into the request loop; [`execution`] holds
//! the multi-step run orchestration used by the tool handlers.

pub mod core;
pub mod execution;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod protocol;
pub mod server;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
