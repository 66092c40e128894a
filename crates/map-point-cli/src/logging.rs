use tracing_subscriber::prelude::*;

/// Initialize logging to stderr, leaving stdout to command output
///
/// Defaults `RUST_LOG` when it is not set.
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;

    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "info,map_point_lib=debug");
            } else {
                std::env::set_var("RUST_LOG", "warn,map_point=info");
            }
        }
    }

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(fmt_layer).init();

    tracing::debug!("Logging initialized");
}
