/*!
 * Tracing subscriber setup
 *
 * The engine and the collaborator crate log through `tracing`; the binary
 * installs one subscriber per process. Console output is compact, a
 * configured log file receives one JSON object per event.
 */

use std::fs::File;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;
use crate::error::{Result, SiteError};

/// Crates whose events pass the default filter
const LOG_TARGETS: [&str; 2] = ["sitesync", "sitesync_interface"];

/// Effective level after applying the verbose flag
pub fn effective_level(config: &LoggingConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.level.to_tracing_level()
    }
}

/// Default `EnvFilter` directive for `level`, used when `RUST_LOG` is unset
pub fn filter_directive(level: Level) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the process-wide subscriber described by `config`
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(effective_level(config))))
        .map_err(|e| SiteError::Config(format!("Invalid log filter: {}", e)))?;

    // exactly one of the two layers is present
    let (console, json_file) = match &config.log_file {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                SiteError::Config(format!(
                    "Cannot create log file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE)
                .json();
            (None, Some(layer))
        }
        None => (Some(fmt::layer().with_target(true).compact()), None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(json_file)
        .try_init()
        .map_err(|e| SiteError::Config(format!("Logger already installed: {}", e)))
}

/// Route engine logs into libtest's captured output. Any test may call it.
pub fn init_test_logging() {
    static INSTALL: Once = Once::new();

    INSTALL.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_directive(Level::DEBUG)));

        // a subscriber set up by the harness takes precedence
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer().without_time().compact())
            .try_init();
    });
}
