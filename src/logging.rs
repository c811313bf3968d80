use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::SweepError;

/// Initialize logging to stderr.
///
/// `RUST_LOG` takes precedence over `level`, which applies to this crate only.
pub fn init_logging(level: &str) -> Result<(), SweepError> {
    let default_filter = format!("stationary_sweep={level}");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(true),
        )
        .try_init()
        .map_err(|err| SweepError::Logging(err.to_string()))?;

    tracing::debug!("logging initialized (level={level})");
    Ok(())
}
