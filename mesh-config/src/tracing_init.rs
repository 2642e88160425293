//! Tracing setup shared by every binary in the mesh (`mesh-cli`, and any
//! gateway/control-plane binaries built on top of it).
//!
//! Grounded on `loom`'s `test_logging` ctor (`EnvFilter` + `fmt::layer()`)
//! and the `config` crate's `tracing-init` feature, which pairs the same
//! `EnvFilter` setup with a `tracing-appender` rolling file writer.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes a stderr-only subscriber from `RUST_LOG`. Call once at
/// process startup; a second call is a silent no-op (mirrors `try_init`'s
/// idempotence in `loom::test_logging`).
pub fn init_stderr() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter()))
        .try_init();
}

#[cfg(feature = "tracing-init")]
pub use file_logging::init_with_file;

#[cfg(feature = "tracing-init")]
mod file_logging {
    use super::env_filter;
    use std::path::Path;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    /// Adds a daily-rolling file layer alongside stderr. The returned
    /// [`WorkerGuard`] must be held for the process lifetime — dropping it
    /// stops the background flush thread.
    pub fn init_with_file(log_dir: &Path, file_name_prefix: &str) -> std::io::Result<WorkerGuard> {
        std::fs::create_dir_all(log_dir)?;
        let appender = tracing_appender::rolling::daily(log_dir, file_name_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(env_filter()))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_filter(env_filter()),
            )
            .try_init();

        Ok(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_stderr_is_idempotent() {
        init_stderr();
        init_stderr();
    }
}
