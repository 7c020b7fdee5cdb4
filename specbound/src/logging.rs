//! Development-time tracing for debugging pipeline runs.
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG` or `-v`, output
//!   to stderr. Not persisted, not part of the command output.
//!
//! - **Run archive (`io/run_log`)**: Per-pass state snapshots and the final
//!   result, written only when an archive directory is given.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for a `-v` count when `RUST_LOG` is unset.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "specbound=info",
        _ => "specbound=debug",
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over `verbosity`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=specbound::healing=debug specbound run --request request.json
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
