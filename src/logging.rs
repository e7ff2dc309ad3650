use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// install the global subscriber
///
/// Without `RUST_LOG` only this crate logs, at `warn` or at `debug` when
/// `verbose` is set. A `RUST_LOG` value replaces that filter entirely.
pub fn init_logging(verbose: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(log_filter(verbose))
        .init();
}

fn default_directives(verbose: bool) -> String {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    format!("off,interest_ledger={level}")
}

fn log_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)))
}
