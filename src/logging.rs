//! Tracing initialization: stdout plus a daily-rolling file under the
//! configured log directory.

use crate::config::LoggingSettings;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global subscriber. `RUST_LOG` overrides the configured
/// level when set. Safe to call once per process; later calls are no-ops.
pub fn init(settings: &LoggingSettings) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&settings.log_dir)?;

    let file_appender =
        RollingFileAppender::new(Rotation::DAILY, &settings.log_dir, "cursor-sync.log");

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.clone()));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_appender),
        )
        .try_init();

    // A second init (e.g. in tests) keeps the first subscriber.
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
    Ok(())
}
