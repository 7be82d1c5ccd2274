use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Installs the global fmt subscriber; `RUST_LOG` overrides the default filter.
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn init() {
    init_with_default("info");
}

fn init_with_default(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
