//! Stable exit codes for the instruction-executor CLI.

/// Command succeeded (or the server reached end of input).
pub const OK: i32 = 0;
/// Command failed: invalid config, unreadable stdio, or other errors.
pub const INVALID: i32 = 1;
/// `validate` found the step source missing.
pub const NO_SOURCE: i32 = 2;
/// `validate` found the step source malformed.
pub const MALFORMED: i32 = 3;
