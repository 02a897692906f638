//! Configuration sources for mmwflash.
//!
//! Settings are resolved with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (MMWFLASH_*)
//! 3. The `.ufsettings` JSON file (port only)
//! 4. Local config file (./mmwflash.toml)
//! 5. Global config file (~/.config/mmwflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Port used when no source names one.
pub const FALLBACK_PORT: &str = "COM9";

/// Object in the `.ufsettings` file that holds the serial settings.
const UFSETTINGS_SECTION: &str = "Serial Connection/Cortex_R4_0";

/// Key under [`UFSETTINGS_SECTION`] naming the port.
const UFSETTINGS_PORT_KEY: &str = "COMPort";

/// Layered TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Default part number.
    pub part: Option<String>,
    /// Default storage target.
    pub storage: Option<String>,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new("mmwflash.toml")) {
            debug!("Loaded local config from mmwflash.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "mmwflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    fn merge(&mut self, other: Self) {
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.baud.is_some() {
            self.baud = other.baud;
        }
        if other.part.is_some() {
            self.part = other.part;
        }
        if other.storage.is_some() {
            self.storage = other.storage;
        }
    }
}

/// Read the port name from a `.ufsettings` file.
///
/// Returns `None` when the file is missing, is not valid JSON, or does not
/// carry the serial section.
pub fn ufsettings_port(path: &Path) -> Option<String> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!("No settings file at {}: {}", path.display(), e);
            return None;
        },
    };

    let json: serde_json::Value = match serde_json::from_str(&content) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to parse settings file {}: {}", path.display(), e);
            return None;
        },
    };

    json.get(UFSETTINGS_SECTION)?
        .get(UFSETTINGS_PORT_KEY)?
        .as_str()
        .map(str::trim)
        .filter(|port| !port.is_empty())
        .map(ToString::to_string)
}

/// Pick the port from the flag/env value, the settings file and the TOML
/// config, in that order.
pub fn resolve_port(cli_port: Option<&str>, settings: &Path, config: &Config) -> String {
    if let Some(port) = cli_port {
        return port.to_string();
    }
    if let Some(port) = ufsettings_port(settings) {
        debug!("Using port {port} from {}", settings.display());
        return port;
    }
    config
        .port
        .clone()
        .unwrap_or_else(|| FALLBACK_PORT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.is_none());
        assert!(config.baud.is_none());
        assert!(config.part.is_none());
        assert!(config.storage.is_none());
    }

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config {
            port: Some("COM3".into()),
            baud: Some(115_200),
            ..Default::default()
        };
        let other = Config {
            baud: Some(921_600),
            part: Some("AWR18".into()),
            ..Default::default()
        };

        base.merge(other);
        assert_eq!(base.port.as_deref(), Some("COM3"));
        assert_eq!(base.baud, Some(921_600));
        assert_eq!(base.part.as_deref(), Some("AWR18"));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config {
            port: Some("/dev/ttyACM0".into()),
            storage: Some("sram".into()),
            ..Default::default()
        };
        base.merge(Config::default());
        assert_eq!(base.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.storage.as_deref(), Some("sram"));
    }

    #[test]
    fn test_config_from_toml() {
        let config: Config = toml::from_str(
            r#"
port = "/dev/ttyACM0"
baud = 115200
part = "IWR16"
storage = "sflash"
"#,
        )
        .unwrap();
        assert_eq!(config.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.baud, Some(115_200));
        assert_eq!(config.part.as_deref(), Some("IWR16"));
        assert_eq!(config.storage.as_deref(), Some("sflash"));
    }

    #[test]
    fn test_load_from_path_bad_toml_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.toml", "port = [");
        assert_eq!(Config::load_from_path(&path), Config::default());
    }

    #[test]
    fn test_load_from_path_missing_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from_path(&dir.path().join("nope.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_ufsettings_port_found() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "generated.ufsettings",
            r#"{"Serial Connection/Cortex_R4_0": {"COMPort": "COM12", "Baud": 115200}}"#,
        );
        assert_eq!(ufsettings_port(&path).as_deref(), Some("COM12"));
    }

    #[test]
    fn test_ufsettings_port_missing_key() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "generated.ufsettings", r#"{"Other": {"COMPort": "COM1"}}"#);
        assert!(ufsettings_port(&path).is_none());
    }

    #[test]
    fn test_ufsettings_port_bad_json() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "generated.ufsettings", "{not json");
        assert!(ufsettings_port(&path).is_none());
    }

    #[test]
    fn test_resolve_port_priority() {
        let dir = TempDir::new().unwrap();
        let settings = write(
            &dir,
            "generated.ufsettings",
            r#"{"Serial Connection/Cortex_R4_0": {"COMPort": "COM12"}}"#,
        );
        let config = Config {
            port: Some("COM4".into()),
            ..Default::default()
        };

        assert_eq!(resolve_port(Some("COM7"), &settings, &config), "COM7");
        assert_eq!(resolve_port(None, &settings, &config), "COM12");

        let missing = dir.path().join("missing.ufsettings");
        assert_eq!(resolve_port(None, &missing, &config), "COM4");
        assert_eq!(resolve_port(None, &missing, &Config::default()), FALLBACK_PORT);
    }
}
