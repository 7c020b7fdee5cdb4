//! Stable exit codes for specbound CLI commands.

/// Command succeeded; for `run`, every artifact was accepted.
pub const OK: i32 = 0;
/// Invalid config, input or request, or an infrastructure failure.
pub const INVALID: i32 = 1;
/// An artifact was rejected by the contract, or `check` found gaps.
pub const REJECTED: i32 = 2;
/// The iteration budget ran out before the exit condition held.
pub const EXHAUSTED: i32 = 3;
