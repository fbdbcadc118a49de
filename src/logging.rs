//! Tracing subscriber setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{MentorError, Result};

/// Installs a global fmt subscriber filtered by `filter` (e.g. `"planmentor=debug"`).
///
/// Fails if the filter does not parse or a subscriber is already installed.
pub fn init_logging(filter: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(filter)
                .map_err(|e| MentorError::InvalidArgument(format!("invalid log filter: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| MentorError::InvalidArgument("logging already initialized".into()))
}
