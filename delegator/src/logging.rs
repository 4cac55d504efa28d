//! Diagnostic tracing for the delegation engine.
//!
//! Diagnostics go to stderr and are filtered by `RUST_LOG`. They are never
//! product output: phase reports are printed to stdout and written under
//! `.delegator/reports/` by `io::report_log`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Defaults to `warn` when `RUST_LOG` is unset.
///
/// ```bash
/// RUST_LOG=delegator=debug delegator check --todos todos.md --phase 1 --task 1.1
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
