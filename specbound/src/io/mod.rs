//! I/O helpers for the pipeline and the CLI.

pub mod config;
pub mod corpus;
pub mod fs_util;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod schema;
pub mod sink;
