//! # Tracing Bootstrap
//!
//! One-shot tracing initialization for binaries. Format defaults to
//! human-readable output; set `WEAVE_LOG_FORMAT=json` for structured
//! production logs. Filtering follows `RUST_LOG` with an info default.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber
///
/// Safe to call once per process; subsequent calls are no-ops (the global
/// default can only be installed once and the error is ignored).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("WEAVE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}
