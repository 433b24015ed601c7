//! Logging initialization for the `specbundle` binary.
//!
//! Controlled by `SPECBUNDLE_LOG`:
//! - unset or empty → no subscriber (tracing disabled, zero overhead)
//! - `"json"` → JSON events and span closes to stderr
//! - anything else → human-readable events to stderr
//!
//! The level filter comes from `RUST_LOG` (default `info`).

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Environment variable selecting the log output.
pub const LOG_ENV: &str = "SPECBUNDLE_LOG";

/// Where log output goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogMode {
    Off,
    Json,
    Pretty,
}

impl LogMode {
    /// Interpret the value of [`LOG_ENV`].
    #[must_use]
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Off,
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            Some(_) => Self::Pretty,
        }
    }
}

/// Install the global subscriber according to [`LOG_ENV`]. Returns the mode
/// that was selected. Calling it twice keeps the first subscriber.
pub fn init() -> LogMode {
    let mode = LogMode::from_env_value(std::env::var(LOG_ENV).ok().as_deref());
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match mode {
        LogMode::Off => return mode,
        LogMode::Json => tracing_subscriber::registry()
            .with(filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
            )
            .try_init(),
        LogMode::Pretty => tracing_subscriber::registry()
            .with(filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init(),
    };
    if let Err(e) = installed {
        eprintln!("warning: logging already initialized: {e}");
    }
    mode
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    #[test]
    fn mode_from_env_value() {
        assert_eq!(LogMode::from_env_value(None), LogMode::Off);
        assert_eq!(LogMode::from_env_value(Some("")), LogMode::Off);
        assert_eq!(LogMode::from_env_value(Some("JSON")), LogMode::Json);
        assert_eq!(LogMode::from_env_value(Some("1")), LogMode::Pretty);
    }
}
