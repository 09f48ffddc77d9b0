//! Logging setup for the `lloyd-mesh` binary.
//!
//! Output goes to stderr through `tracing`. The filter comes from the
//! `LLOYD_LOG` environment variable when set, e.g.
//!
//! - `LLOYD_LOG=debug`
//! - `LLOYD_LOG=warn,lloyd_mesh::comm=debug`
//!
//! and defaults to `info` otherwise. Any `-v` on the command line overrides
//! the variable.

use tracing_subscriber::{fmt, EnvFilter};

/// Name of the environment variable holding the log filter
pub const LOG_ENV: &str = "LLOYD_LOG";

/// Default level for a number of `-v` flags
pub fn default_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Filter directive for a verbosity count and the value of `LLOYD_LOG`
pub fn filter_directive(verbosity: u8, env: Option<&str>) -> String {
    match env {
        Some(directive) if verbosity == 0 && !directive.trim().is_empty() => directive.to_string(),
        _ => default_level(verbosity).to_string(),
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(verbosity: u8) {
    let env = std::env::var(LOG_ENV).ok();
    let directive = filter_directive(verbosity, env.as_deref());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(default_level(0)));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .compact();

    let _ = subscriber.try_init();
}
