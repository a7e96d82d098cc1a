//! Tracing setup.
//!
//! The subscriber starts at `info` so configuration loading is logged, then
//! [`apply_logging`] swaps in the configured filter through a reload handle.
//! `RUST_LOG`, when set, wins over both.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

/// Dependencies that are chatty at `debug` and below.
const QUIET_TARGETS: &[&str] = &["hyper_util=info", "h2=info", "sqlx=warn", "redis=info"];

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

pub fn init_tracing() {
    let filter = env_filter().unwrap_or_else(|| filter_directives("info", &[]));
    let (filter, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

fn env_filter() -> Option<EnvFilter> {
    std::env::var_os("RUST_LOG")?;
    EnvFilter::try_from_default_env().ok()
}

/// Swaps in the configured level and extra directives.
pub fn apply_logging(config: &LoggingConfig) {
    if env_filter().is_some() {
        return;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    let filter = filter_directives(&config.level, &config.directives);
    if let Err(e) = handle.reload(filter) {
        tracing::warn!(error = %e, "failed to apply logging configuration");
    }
}

/// `level`, then the quiet defaults, then the configured directives, so a
/// configured directive can re-enable a quieted dependency.
pub fn filter_directives(level: &str, directives: &[String]) -> EnvFilter {
    let mut filter = EnvFilter::new(level);
    for directive in QUIET_TARGETS
        .iter()
        .copied()
        .chain(directives.iter().map(String::as_str))
    {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring invalid log directive {directive:?}: {e}"),
        }
    }
    filter
}
