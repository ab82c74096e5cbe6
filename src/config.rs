use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::controller::ControllerSettings;
use crate::logging::LoggingSettings;

pub const CONFIG_ENV: &str = "JOYBUS_CONFIG";
const CONFIG_DIR: &str = "joybus";
const CONFIG_FILE: &str = "config.toml";

/// Which device backend the host constructs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Gilrs,
    Virtual,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Gilrs => f.write_str("gilrs"),
            BackendKind::Virtual => f.write_str("virtual"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub controller: ControllerSettings,
    pub logging: LoggingSettings,
    pub backend: BackendKind,
}

impl AppConfig {
    /// Loads the configuration.
    ///
    /// The file is taken from `path` if given, else from the `JOYBUS_CONFIG`
    /// environment variable, else from the user config directory. A missing
    /// file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .or_else(Self::default_path),
        };
        match path {
            Some(path) => Self::load_file(&path),
            None => {
                warn!("Could not determine config directory, using default config");
                Ok(Self::default())
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(
                "Config file {} does not exist, using default",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {}", path.display());
        debug!("Config: {:?}", config);
        Ok(config)
    }

    /// `<config_dir>/joybus/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push(CONFIG_DIR);
            path.push(CONFIG_FILE);
            path
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceCategory;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.controller.connection_interval_ms, 500);
        assert_eq!(config.controller.polling_hz, 60);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
backend = "virtual"

[controller]
polling_hz = 120
device_categories = ["gamepad", "flight"]

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.backend, BackendKind::Virtual);
        assert_eq!(config.controller.polling_hz, 120);
        assert_eq!(config.controller.connection_interval_ms, 500);
        assert_eq!(
            config.controller.device_categories,
            vec![DeviceCategory::Gamepad, DeviceCategory::Flight]
        );
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.thread_names);
    }

    #[test]
    fn invalid_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[controller]\npolling_hz = \"fast\"").unwrap();

        let result = AppConfig::load(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn default_path_ends_with_app_file() {
        if let Some(path) = AppConfig::default_path() {
            assert!(path.ends_with("joybus/config.toml"));
        }
    }
}
