use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "REMEDY_LOG";
const DEFAULT_FILTER: &str = "remedy=info";
const VERBOSE_FILTER: &str = "remedy=debug";

/// Install the global subscriber. Logs go to stderr so `report --json`
/// output on stdout stays machine-readable.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
