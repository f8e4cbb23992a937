//! Shared utilities: tracing bootstrap, clock, id generation.

pub mod clock;
pub mod ids;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{IdGenerator, SequencedIds, UuidGenerator};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "EDDA_LOG";

/// Initialize tracing with the EDDA_LOG environment variable.
///
/// Defaults to "info" level if EDDA_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
