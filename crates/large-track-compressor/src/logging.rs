//! Logging and optional chrome-trace profiling setup

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Keeps the trace file open while profiling; flushes it on drop
#[cfg(feature = "profiling")]
pub type ProfilingGuard = Option<tracing_chrome::FlushGuard>;
#[cfg(not(feature = "profiling"))]
pub type ProfilingGuard = ();

/// Initialize logging (and profiling if compiled in)
///
/// - If RUST_LOG is not set, set a helpful default.
/// - Logs go to stderr so progress output on stdout stays machine readable.
pub fn setup_logging() -> ProfilingGuard {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "debug,large_track_compress_lib::parser=info");
            } else {
                std::env::set_var("RUST_LOG", "warn,large_track_compressor=info");
            }
        }
    }

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());

    #[cfg(feature = "profiling")]
    let guard = {
        let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .include_args(true)
            .build();
        tracing_subscriber::registry()
            .with(chrome_layer)
            .with(fmt_layer)
            .init();
        tracing::info!("Profiling enabled, writing trace-*.json to the current directory");
        Some(guard)
    };

    #[cfg(not(feature = "profiling"))]
    #[allow(clippy::let_unit_value)]
    let guard = tracing_subscriber::registry().with(fmt_layer).init();

    guard
}
