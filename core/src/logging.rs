//! Tracing subscriber setup for embedding applications that want the
//! core's structured logs on stderr/JSON without configuring
//! `tracing-subscriber` themselves.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes a global JSON-formatted subscriber filtered by `RUST_LOG`,
/// falling back to `default_directive` when the env var is unset.
///
/// Safe to call once per process; a second call is a no-op (the global
/// default subscriber can only be set once).
pub fn init(default_directive: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
