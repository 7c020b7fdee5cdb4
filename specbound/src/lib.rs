//! Deterministic requirement-bound generation of work items.
//!
//! A specification corpus is mined once for hard requirements. Each request
//! is bound to the requirements of its domain and pushed through a bounded
//! Draft / ComplianceValidate / Refine loop against a non-deterministic
//! generation oracle. Only artifacts that pass the deterministic contract
//! gate are persisted.
//!
//! - **[`core`]**: Pure, deterministic logic (extraction, binding, compliance,
//!   contract enforcement). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (oracle processes, config, prompts,
//!   persistence, run archives).
//!
//! Orchestration modules ([`stages`], [`healing`], [`sequence`], [`looping`],
//! [`pipeline`], [`batch`]) combine both to implement the CLI commands.

pub mod batch;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod healing;
pub mod io;
pub mod logging;
pub mod looping;
pub mod pipeline;
pub mod sequence;
pub mod stages;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
