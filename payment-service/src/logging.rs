use tracing_subscriber::EnvFilter;

/// Installs the process-wide JSON subscriber. `RUST_LOG` overrides the `info` default.
pub fn init() {
    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
