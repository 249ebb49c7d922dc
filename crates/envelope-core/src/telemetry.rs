//! Tracing subscriber setup for binaries and integration harnesses.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::EnvelopeError;

/// Used when neither `RUST_LOG` nor a caller filter is given.
pub const DEFAULT_FILTER: &str = "envelope_core=info,chain_sol=warn";

/// Install a fmt subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Returns `Ok(false)` if a global subscriber is already installed, so it
/// is safe to call from every test.
pub fn init_tracing(default_filter: Option<&str>) -> Result<bool, EnvelopeError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter.unwrap_or(DEFAULT_FILTER)))
        .map_err(|e| EnvelopeError::Config(format!("invalid log filter: {e}")))?;

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok();
    Ok(installed)
}
