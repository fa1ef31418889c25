//! Tracing initialization.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] (default `info`, overridable
//! through `RUST_LOG`) and a single fmt layer, either human-readable or JSON lines.
//!
//! ```bash
//! RUST_LOG=svcguard=debug svcguard inspect <token>
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing
///
/// Parameters:
/// - `json_logs`: emit one JSON object per event instead of the default text format
pub fn init_telemetry(json_logs: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    }

    info!(json_logs, "Telemetry initialized");
    Ok(())
}
