// Tracing log adapter - Structured logging using tracing crate

use tracing_subscriber::EnvFilter;

use crate::error::{NarracutError, NarracutResult};

/// Log output settings taken from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Tracing subscriber installer
pub struct TracingLogAdapter;

impl TracingLogAdapter {
    /// Build the filter: `RUST_LOG` wins, otherwise `level` applies
    pub fn filter(level: &str) -> NarracutResult<EnvFilter> {
        let level = level.trim().to_lowercase();
        if !matches!(
            level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error" | "off"
        ) {
            return Err(NarracutError::ConfigError {
                message: format!(
                    "Invalid log level: {}. Valid levels: trace, debug, info, warn, error, off",
                    level
                ),
            });
        }
        Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
    }

    /// Install the global subscriber; later calls are no-ops
    pub fn init(settings: &LogSettings) -> NarracutResult<()> {
        let filter = Self::filter(&settings.level)?;
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false);

        // Already installed (tests, embedding applications): keep the existing one.
        let _ = if settings.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_level() {
        assert!(TracingLogAdapter::filter("loud").is_err());
        assert!(TracingLogAdapter::filter("DEBUG").is_ok());
    }

    #[test]
    fn test_init_is_idempotent() {
        let settings = LogSettings::default();
        assert!(TracingLogAdapter::init(&settings).is_ok());
        assert!(TracingLogAdapter::init(&LogSettings { json: true, ..settings }).is_ok());
    }
}
