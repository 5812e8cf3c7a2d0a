use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise this crate logs at `info` (or `debug` with
/// `verbose`) and everything else at `warn`.
pub fn init(verbose: bool) {
    let default = if verbose {
        "warn,tee_time_aggregator=debug"
    } else {
        "warn,tee_time_aggregator=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A second call (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();
}
