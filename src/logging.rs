//=============================================
// teal/logging.rs
//=============================================
// Goal: Tracing setup for the teal binary
// Objective: One subscriber per process, filtered through TEAL_LOG
//=============================================

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;

/// Environment variable holding the tracing filter directives.
pub const LOG_ENV: &str = "TEAL_LOG";

static INIT: OnceCell<()> = OnceCell::new();

/// Install the global subscriber. Events go to stderr so program output on
/// stdout stays clean. `trace` raises the machine's level so per-instruction
/// events are visible when no explicit filter is set.
pub fn init(trace: bool) {
    INIT.get_or_init(|| {
        let fallback = if trace {
            "info,teal_core=trace"
        } else {
            "info"
        };
        let filter =
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
        SubscriberBuilder::default()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
            .init();
    });
    tracing::debug!(trace, "tracing initialised");
}
