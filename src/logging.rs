//! Log level / format parsing and subscriber setup shared by all binaries.
//!
//! Diagnostics always go to stderr: the launcher shares its stdout with the
//! program it wraps, and `podlock create-container` prints its result on
//! stdout.

use std::fmt;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LogConfigError {
    #[error("invalid log level '{0}': expected one of trace, debug, info, warn, error")]
    Level(String),

    #[error("invalid log format '{0}': expected json or text")]
    Format(String),
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = LogConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" | "" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => Err(LogConfigError::Format(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => f.write_str("json"),
            LogFormat::Text => f.write_str("text"),
        }
    }
}

/// Parse a log level name, case-insensitively. Empty input is rejected.
pub fn parse_level(s: &str) -> Result<Level, LogConfigError> {
    if s.trim().is_empty() {
        return Err(LogConfigError::Level(s.to_string()));
    }
    Level::from_str(s.trim()).map_err(|_| LogConfigError::Level(s.to_string()))
}

/// Install the global subscriber.
///
/// `RUST_LOG` still takes precedence when set, so individual modules can be
/// turned up while debugging. Calling this twice is a no-op.
pub fn init(level: Level, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.with_target(false).try_init(),
    };
}
