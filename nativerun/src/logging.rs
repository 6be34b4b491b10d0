//! Diagnostic tracing for the launcher and the execution methods.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Captured as the child's output when the launcher runs isolated.
//!
//! - **Wire and measurement files (`io/wire`, `io/instrumentation`)**: Product
//!   artifacts. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber. Library code never calls this on its own.
///
/// Reads `RUST_LOG`; defaults to `warn`.
///
/// # Example
/// ```bash
/// RUST_LOG=nativerun=debug nativerun --batch batch.json --results results.json
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // A host application may already own the global subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
