//! Logging sink used by the controller core, and console setup for hosts.
//!
//! The core never talks to a subscriber directly. It writes through a
//! [`Logger`], which hosts may replace; the default forwards to `tracing`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::str::FromStr;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Sink for lifecycle messages of the controller core.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn debug(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);

    fn error_with(&self, message: &str, cause: &dyn Error) {
        self.error(&format!("{}{}", message, cause));
    }
}

/// Forwards to `tracing`, tagging each line with the component name.
///
/// Nothing is printed until a subscriber is installed, for example with
/// [`init_console`].
#[derive(Debug, Clone)]
pub struct TracingLogger {
    name: String,
}

impl TracingLogger {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("joybus::controller")
    }
}

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        info!(component = %self.name, "{}", message);
    }

    fn debug(&self, message: &str) {
        debug!(component = %self.name, "{}", message);
    }

    fn warning(&self, message: &str) {
        warn!(component = %self.name, "{}", message);
    }

    fn error(&self, message: &str) {
        error!(component = %self.name, "{}", message);
    }

    fn error_with(&self, message: &str, cause: &dyn Error) {
        error!(component = %self.name, error = %cause, "{}", message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// One of trace, debug, info, warn, error.
    pub level: String,
    /// Tag every line with the emitting thread's name.
    pub thread_names: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            thread_names: true,
        }
    }
}

impl LoggingSettings {
    /// Parsed level; unknown names fall back to info.
    pub fn max_level(&self) -> Level {
        Level::from_str(self.level.trim()).unwrap_or(Level::INFO)
    }
}

/// Installs the console subscriber. Returns false if one was already set.
pub fn init_console(settings: &LoggingSettings) -> bool {
    FmtSubscriber::builder()
        .with_max_level(settings.max_level())
        .with_target(false)
        .with_thread_names(settings.thread_names)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[derive(Debug)]
    struct Cause;

    impl std::fmt::Display for Cause {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("device busy")
        }
    }

    impl Error for Cause {}

    #[test]
    fn level_names_are_parsed() {
        let mut settings = LoggingSettings::default();
        assert_eq!(settings.max_level(), Level::INFO);
        settings.level = "DEBUG".to_string();
        assert_eq!(settings.max_level(), Level::DEBUG);
        settings.level = "loud".to_string();
        assert_eq!(settings.max_level(), Level::INFO);
    }

    #[test]
    #[traced_test]
    fn tracing_logger_forwards_messages() {
        let logger = TracingLogger::new("test-component");
        logger.warning("Hat stuck");
        logger.error_with("Read failed: ", &Cause);

        assert!(logs_contain("Hat stuck"));
        assert!(logs_contain("Read failed"));
        assert!(logs_contain("device busy"));
        assert!(logs_contain("test-component"));
    }
}
