use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,fitsocial=debug";

/// Installs the global subscriber. Later calls are no-ops, so the Spin
/// component can call this on every request.
pub fn init() {
    let filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
