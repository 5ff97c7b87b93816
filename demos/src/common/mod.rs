//! Shared plumbing for the demo binaries.

pub mod backend;

pub use backend::{create_device, get_backend_name, SelectedBackend, SelectedDevice};

/// Install a `tracing` fmt subscriber. `verbose` counts `-v` flags:
/// 0 is INFO, 1 is DEBUG, anything above is TRACE.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}
